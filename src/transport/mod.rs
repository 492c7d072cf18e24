/// TCP transport helpers (connect with optional timeout).
pub mod tcp;
