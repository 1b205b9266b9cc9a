pub mod contract;
pub mod records;
pub mod shortlist;
pub mod story;
