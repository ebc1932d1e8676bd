//! Built-in verification gateways.

pub mod face;
pub mod qr;

pub use face::FaceGateway;
pub use qr::QrGateway;
