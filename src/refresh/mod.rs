mod gate;
mod policy;

pub use gate::AuthRefreshGate;
