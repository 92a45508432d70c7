pub mod store;
pub mod timegrid;
