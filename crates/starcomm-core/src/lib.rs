//! Starcomm Core - run Starlink applications and read back their parameters
//!
//! A Starlink application is launched as an ordinary child process with a
//! prepared environment. When it exits cleanly it leaves an ADAM parameter
//! file (an HDS container) named after the command in the session's scratch
//! directory; that container is flattened into a [`Record`].
//!
//! ```no_run
//! use starcomm_core::{Config, Invocation, Session};
//!
//! let session = Session::new(Config::default())?;
//! let stats = Invocation::new("$KAPPA_DIR/stats", "stats")
//!     .param("ndf", "m31.sdf")
//!     .param("order", true);
//! let output = session.invoke_and_decode(&stats)?;
//! if let Some(record) = output.record {
//!     println!("{}", record);
//! }
//! # Ok::<(), starcomm_core::StarError>(())
//! ```

pub mod args;
pub mod config;
pub mod decode;
pub mod environ;
pub mod error;
pub mod hds;
pub mod hdstrace;
pub mod invoke;
pub mod naming;
pub mod record;
pub mod session;

pub use args::{Invocation, ParamValue};
pub use config::Config;
pub use environ::Environment;
pub use error::{DecodeError, StarError};
pub use hds::{Component, ContainerSource};
pub use hdstrace::HdsTrace;
pub use invoke::RunOutput;
pub use record::{Record, Value};
pub use session::{Output, Session};
