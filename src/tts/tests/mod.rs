pub mod helpers;
mod correctness;
mod failure_injection;
