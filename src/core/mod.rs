//! Core console-driving components.
//!
//! - **process**: emulator child process, its pipes and its process group
//! - **timing**: fixed delays that stand in for guest readiness
//! - **script**: the ordered command lines to type
//! - **sequencer**: writes commands and the quit sequence to the console
//! - **termination**: quit, stop and kill escalation
//! - **collector**: drains and decodes the emulator's output
//! - **session**: ties the above into one launch-to-collect run
//!
//! # Flow
//!
//! ```text
//! Session
//! ├── EmulatorProcess::spawn   (launch, own session)
//! ├── Sequencer::send_script   (boot delay, paced lines)
//! ├── termination::shut_down   (Ctrl-A x, SIGTERM, SIGKILL)
//! └── EmulatorProcess::collect (stdout + stderr + exit status)
//! ```

pub mod collector;
pub mod process;
pub mod script;
pub mod sequencer;
pub mod session;
pub mod termination;
pub mod timing;
