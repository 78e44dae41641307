pub mod desk;
pub mod envelope;

pub use desk::CashierDesk;
pub use envelope::Envelope;
