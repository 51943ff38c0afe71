pub mod booking;
pub mod confirmation;
pub mod conversation;
pub mod session;
