//! E2E tests over in-memory links
//!
//! Each test writes a switch configuration (plus stage files) to a scratch
//! directory, builds a switch on the memory backend and plays the hosts
//! from the far ends of the links.

mod arp;
mod filtering;
mod harness;
mod routing;
mod switching;
