//! Integration tests for sessions, transports and the socket server

// Session state machine driven through a mock transport
pub mod session_scenarios;


// Full-duplex adapter over an in-memory channel
pub mod full_duplex;
