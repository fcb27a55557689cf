#![no_std]

// Shared logic for the battery measurement pipeline.
//
// This crate stays portable across MCU firmware and host tooling by avoiding
// the Rust standard library and any HAL or executor dependency: callers pass
// monotonic instants in and hardware sits behind the trait seams declared in
// `pipeline`.

pub mod calibration;
pub mod conversion;
pub mod history;
pub mod pipeline;
pub mod soc;
