pub mod brand;
pub mod creative;
pub mod job;
pub mod requests;
pub mod template;
