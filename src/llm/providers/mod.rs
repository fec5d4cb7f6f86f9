pub mod mistral;
pub mod simulation;
