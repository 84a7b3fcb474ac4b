pub mod counter;
pub mod quote;
pub mod request;
