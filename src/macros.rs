/// Declares a closed set of string-backed states with `as_str`/`parse`/`Display`.
///
/// Values are persisted as their text form; `from_stored` turns an unknown
/// stored value into a store error rather than a panic.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
            ::utoipa::ToSchema,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }

            /// Parses a value read back from the store.
            #[allow(dead_code)]
            pub(crate) fn from_stored(value: &str) -> Result<Self, $crate::error::DomainError> {
                Self::parse(value).ok_or_else(|| {
                    $crate::error::DomainError::TransientStore(format!(
                        "unrecognised {} '{}' in store",
                        stringify!($name),
                        value
                    ))
                })
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use string_enum;
