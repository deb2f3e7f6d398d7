// Shared data types and small helpers used across crates.
pub mod model;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("invalid peer kind: {0}")]
    InvalidPeerKind(i16),
    #[error("config error: {0}")]
    Config(String),
}

pub mod ids {
    // Strongly typed IDs to avoid mixing namespaces at compile time.
    use super::{Error, Result};
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;
    use uuid::Uuid;

    macro_rules! id_type {
        ($name:ident) => {
            #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
            pub struct $name(Uuid);

            impl $name {
                // Generate a new random ID for this namespace.
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                // Wrap an existing UUID when decoding from the bus or storage.
                pub fn from_uuid(uuid: Uuid) -> Self {
                    Self(uuid)
                }

                // Expose the underlying UUID for interoperability.
                pub fn as_uuid(&self) -> Uuid {
                    self.0
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = Error;

                fn from_str(input: &str) -> Result<Self> {
                    // Preserve the original input for clearer error messages.
                    let uuid =
                        Uuid::parse_str(input).map_err(|_| Error::InvalidId(input.into()))?;
                    Ok(Self(uuid))
                }
            }
        };
    }

    id_type!(UserId);
    id_type!(ConnId);
}
