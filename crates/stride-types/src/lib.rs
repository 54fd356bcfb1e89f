pub mod envelope;
pub mod relay;

pub use envelope::Envelope;
