//! Repositories over the global store.
//!
//! Unlike actor stores, these tables are shared by every tenant; every write
//! is a single conditional statement so no lock spans an actor call.

pub mod membership;
pub mod shop_registry;

pub use membership::{GlobalMembership, MembershipStore, SeaOrmMembershipStore, SharedMemberships};
pub use shop_registry::{
    ClaimOutcome, RegistryEntry, SeaOrmShopRegistry, SharedRegistry, ShopRegistry,
};
