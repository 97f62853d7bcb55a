//! # Drive TI debug targets through Code Composer Studio
//!
//! `tiflash` identifies a hardware target from whatever the caller knows about
//! it (a probe serial number, a device family, a connection type or a target
//! configuration file) and drives the scripting engine of a Code Composer
//! Studio installation to flash, verify and inspect it.
//!
//! # Examples
//!
//! ## Flashing a board by its probe serial number
//! ```no_run
//! # async fn example() -> Result<(), tiflash::Error> {
//! use std::path::Path;
//! use std::sync::Arc;
//! use tiflash::{installation, ConfigStore, Dss, IdentityRequest, TargetDb, TargetOptions, TargetSession};
//!
//! // Use the newest installation on this machine.
//! let installation = installation::find(None, None)?;
//!
//! let catalog = TargetDb::new(&installation);
//! let store = ConfigStore::open_default()?;
//! let engine = Arc::new(Dss::new(&installation)?);
//!
//! let request = IdentityRequest {
//!     serial_number: Some("L4000123".to_string()),
//!     ..Default::default()
//! };
//! let mut target =
//!     TargetSession::open(engine, &catalog, &store, &request, &TargetOptions::default()).await?;
//!
//! target.erase().await?;
//! target.flash(Path::new("firmware.out"), false, None).await?;
//! target.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Finding out what a partial identity resolves to
//! ```no_run
//! # use tiflash::Error;
//! use tiflash::{installation, ConfigStore, IdentityRequest, Resolver, TargetDb};
//!
//! let installation = installation::find(Some("12"), None)?;
//! let catalog = TargetDb::new(&installation);
//! let store = ConfigStore::open_default()?;
//!
//! let request = IdentityRequest {
//!     device_family: Some("CC1352R1F3".to_string()),
//!     ..Default::default()
//! };
//! let resolution = Resolver::new(&catalog, &store).resolve(&request)?;
//! println!("{:?}", resolution.identity.connection_type);
//! # Ok::<(), Error>(())
//! ```

pub mod catalog;
#[warn(missing_docs)]
pub mod channel;
pub mod config;
mod error;
pub mod identity;
pub mod installation;
pub mod paths;
#[warn(missing_docs)]
mod target;
pub mod xds110;

pub use crate::catalog::{DeviceCatalog, TargetDb};
pub use crate::channel::{
    CommandRequest, CommandResponse, CommandStatus, Dss, Engine, ListKind, Session, SessionOptions,
};
pub use crate::config::{ensure_consistent, ConfigGenerator, ConfigStore, PersistedConfig};
pub use crate::error::Error;
pub use crate::identity::{IdentityRequest, Resolution, Resolver, Source, TargetIdentity};
pub use crate::installation::{Installation, Version};
pub use crate::target::{TargetOptions, TargetSession};
