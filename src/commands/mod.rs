pub mod evaluate;
pub mod index;
pub mod search;
pub mod status;
