// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::thread;
use std::time::{Duration, Instant};

const POLL_TIMEOUT: Duration = Duration::from_secs(10);
const FIRST_TICK: Duration = Duration::from_millis(5);
const MAX_TICK: Duration = Duration::from_millis(100);

/// Polls `predicate` with a doubling interval until it holds, panicking with
/// `error_msg` once the timeout passes. Used to wait on background workers.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + POLL_TIMEOUT;
    let mut tick = FIRST_TICK;
    while !predicate() {
        assert!(Instant::now() < deadline, "{}", error_msg);
        thread::sleep(tick);
        tick = (tick * 2).min(MAX_TICK);
    }
}
