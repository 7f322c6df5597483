pub mod jenkins;
pub mod notify;
pub mod sso;
pub mod submission;
pub mod sync;
