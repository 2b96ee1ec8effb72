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
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use super::clamp_to_int;

/// Noise-shaping filter applied to past quantisation errors.
const SHAPED_COEFFICIENTS: [f32; 5] = [2.033, -2.165, 1.959, -1.590, 0.6149];

/// How quantisation noise is treated when narrowing to an integer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DitherType {
    #[default]
    None,
    Rectangle,
    Triangle,
    Shaped,
}

/// Per-conversion dither state.
pub(super) struct Ditherer {
    kind: DitherType,
    rng: Option<StdRng>,
    errors: [f32; SHAPED_COEFFICIENTS.len()],
    phase: usize,
}

impl Ditherer {
    pub(super) fn new(kind: DitherType) -> Self {
        let rng = match kind {
            DitherType::None => None,
            _ => Some(StdRng::from_entropy()),
        };
        Ditherer {
            kind,
            rng,
            errors: [0.0; SHAPED_COEFFICIENTS.len()],
            phase: 0,
        }
    }

    /// Scales a float sample by `scale` and quantises it.
    pub(super) fn to_int(&mut self, sample: f32, scale: f32) -> i32 {
        let value = sample * scale;
        match (self.kind, self.rng.as_mut()) {
            (DitherType::Rectangle, Some(rng)) => {
                clamp_to_int(value + rng.gen_range(-0.5f32..0.5f32), scale)
            }
            (DitherType::Triangle, Some(rng)) => {
                let noise = rng.gen::<f32>() - rng.gen::<f32>();
                clamp_to_int(value + noise, scale)
            }
            (DitherType::Shaped, Some(rng)) => {
                let n = self.errors.len();
                let shaped: f32 = SHAPED_COEFFICIENTS
                    .iter()
                    .enumerate()
                    .map(|(i, c)| c * self.errors[(self.phase + n - i) % n])
                    .sum();
                let target = value - shaped;
                let noise = (rng.gen::<f32>() - rng.gen::<f32>()) * 0.5;
                let result = clamp_to_int(target + noise, scale);
                self.phase = (self.phase + 1) % n;
                self.errors[self.phase] = result as f32 - target;
                result
            }
            _ => clamp_to_int(value, scale),
        }
    }
}
