//! Payment gateway adapters.
//!
//! Implementations of [`domain::PaymentGateway`] plus the inbound side of
//! provider integration: normalizing callback bodies and verifying that a
//! callback really came from the provider.

pub mod error;
pub mod memory;
pub mod mpesa;
pub mod routing;
pub mod verify;

pub use error::CallbackError;
pub use memory::InMemoryPaymentGateway;
pub use mpesa::{MpesaConfig, MpesaGateway, normalize_msisdn, parse_stk_callback};
pub use routing::RoutingGateway;
pub use verify::{CallbackVerifier, SIGNATURE_HEADER, sign};
