//! LNURL protocol support.
//!
//! - [`codec`]: bech32 LNURLs, LUD-17 schemes and lightning addresses
//! - [`LnurlClient`]: resolving pay, withdraw and login requests against
//!   remote services
//! - [`auth`]: lnurl-auth linking keys and challenge signatures
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use lnurl::{LnurlClient, LnurlRequest};
//!
//! # async fn example() -> lnurl::Result<()> {
//! let client = LnurlClient::new(Duration::from_secs(10))?;
//! match client.scan("alice@example.com").await? {
//!     LnurlRequest::Pay(pay) => {
//!         let invoice = client.fetch_invoice(&pay, pay.min_sendable, None).await?;
//!         println!("{}", invoice.pr);
//!     }
//!     other => println!("not a pay request: {}", other.tag()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
mod client;
pub mod codec;
mod error;
mod types;

pub use auth::{LinkingKey, SignedChallenge};
pub use client::LnurlClient;
pub use error::{LnurlError, Result};
pub use types::{
    parse_metadata, InvoiceResponse, LnurlRequest, LoginRequest, PayRequest, SuccessAction,
    WithdrawRequest,
};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
