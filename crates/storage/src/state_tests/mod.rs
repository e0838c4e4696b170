// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod jobs;
mod machines;
mod packages;
mod security;

use super::*;
use fd_core::Event;

#[test]
fn append_bounded_passes_small_chunks() {
    let mut out = String::new();
    append_bounded(&mut out, "hello ");
    append_bounded(&mut out, "world");
    assert_eq!(out, "hello world");
}

#[test]
fn append_bounded_truncates_with_marker_once() {
    let mut out = String::new();
    append_bounded(&mut out, &"x".repeat(OUTPUT_LIMIT_BYTES));
    append_bounded(&mut out, "more");
    assert!(out.ends_with(TRUNCATION_MARKER));
    let len_after_first_overflow = out.len();

    append_bounded(&mut out, "even more");
    assert_eq!(out.len(), len_after_first_overflow);
}

#[test]
fn append_bounded_respects_char_boundaries() {
    let mut out = "y".repeat(OUTPUT_LIMIT_BYTES - 1);
    append_bounded(&mut out, "é");
    assert!(out.ends_with(TRUNCATION_MARKER));
    assert!(out.is_char_boundary(out.len()));
}

#[test]
fn control_events_do_not_touch_state() {
    let mut state = MaterializedState::default();
    state.apply_event(&Event::Shutdown);
    state.apply_event(&Event::Custom);
    assert!(state.machines.is_empty());
    assert!(state.jobs.is_empty());
}
