pub mod election;
pub mod voter;
