//! pagelens kernel: the top-level facade over the browser lifecycle,
//! the session transport, the DOM tree builder and the content
//! extraction pipeline.
//!
//! Typical use:
//!
//! ```no_run
//! use pagelens_kernel::{Browser, KernelConfig};
//!
//! # async fn run() -> Result<(), pagelens_core_types::CoreError> {
//! let browser = Browser::new(KernelConfig::default());
//! browser.launch().await?;
//! browser.navigate("https://example.com").await?;
//! let section = browser.extract().await?;
//! println!("{}", section.to_markdown());
//! browser.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod port;

pub use browser::Browser;
pub use config::KernelConfig;
pub use port::CdpPort;
