//! Entities stored in a tenant actor's embedded database.

pub mod campaign;
pub mod campaign_segment;
pub mod connected_store;
pub mod customer;
pub mod invitation;
pub mod member;
pub mod organization;
pub mod segment;
pub mod segment_member;
