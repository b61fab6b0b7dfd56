#![allow(clippy::needless_range_loop)]

//! Tools for evolving the state of a register of qubits (or qudits) under
//! arbitrary operations, keeping unentangled subsystems in separate
//! representations.
//!
//! Two representations are provided: dense state vectors, which accept any
//! unitary, mixture, or channel, and CH-form stabilizer states, which accept
//! only Clifford operations but scale polynomially in the number of qubits.
//! Either can be driven through a [`StateContainer`][container::StateContainer],
//! which merges representations when an operation entangles them and splits
//! them again after measurements.

pub mod qid;
pub mod error;
pub mod gate;
pub mod op;
pub mod classical;
pub mod select;
pub mod state;
pub mod dense;
pub mod ch;
pub mod config;
pub mod container;
