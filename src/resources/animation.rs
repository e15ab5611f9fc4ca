//! Keyframe sampling for MDX tracks.
//!
//! Tracks are sampled inside the interval of the active sequence; tracks bound to
//! a global sequence loop over their own duration regardless of the sequence.

use cgmath::{InnerSpace, Quaternion};

use crate::data_structures::model::{Interpolation, Model, Sequence, Track};

pub trait Interpolate: Copy {
    fn lerp(a: Self, b: Self, t: f32) -> Self;

    fn hermite(a: Self, out_tan: Self, in_tan: Self, b: Self, t: f32) -> Self;

    fn bezier(a: Self, out_tan: Self, in_tan: Self, b: Self, t: f32) -> Self;
}

fn hermite_factors(t: f32) -> [f32; 4] {
    let t2 = t * t;
    [
        t2 * (2.0 * t - 3.0) + 1.0,
        t2 * (t - 2.0) + t,
        t2 * (t - 1.0),
        t2 * (3.0 - 2.0 * t),
    ]
}

fn bezier_factors(t: f32) -> [f32; 4] {
    let inv = 1.0 - t;
    [inv * inv * inv, 3.0 * t * inv * inv, 3.0 * t * t * inv, t * t * t]
}

impl Interpolate for f32 {
    fn lerp(a: Self, b: Self, t: f32) -> Self {
        a + (b - a) * t
    }

    fn hermite(a: Self, out_tan: Self, in_tan: Self, b: Self, t: f32) -> Self {
        let [f1, f2, f3, f4] = hermite_factors(t);
        a * f1 + out_tan * f2 + in_tan * f3 + b * f4
    }

    fn bezier(a: Self, out_tan: Self, in_tan: Self, b: Self, t: f32) -> Self {
        let [f1, f2, f3, f4] = bezier_factors(t);
        a * f1 + out_tan * f2 + in_tan * f3 + b * f4
    }
}

impl Interpolate for [f32; 3] {
    fn lerp(a: Self, b: Self, t: f32) -> Self {
        std::array::from_fn(|i| f32::lerp(a[i], b[i], t))
    }

    fn hermite(a: Self, out_tan: Self, in_tan: Self, b: Self, t: f32) -> Self {
        std::array::from_fn(|i| f32::hermite(a[i], out_tan[i], in_tan[i], b[i], t))
    }

    fn bezier(a: Self, out_tan: Self, in_tan: Self, b: Self, t: f32) -> Self {
        std::array::from_fn(|i| f32::bezier(a[i], out_tan[i], in_tan[i], b[i], t))
    }
}

/// Four-component tracks are rotations (`[x, y, z, w]`).
impl Interpolate for [f32; 4] {
    fn lerp(a: Self, b: Self, t: f32) -> Self {
        to_array(slerp(quaternion(a), quaternion(b), t))
    }

    fn hermite(a: Self, out_tan: Self, in_tan: Self, b: Self, t: f32) -> Self {
        squad(a, out_tan, in_tan, b, t)
    }

    fn bezier(a: Self, out_tan: Self, in_tan: Self, b: Self, t: f32) -> Self {
        squad(a, out_tan, in_tan, b, t)
    }
}

pub(crate) fn quaternion(value: [f32; 4]) -> Quaternion<f32> {
    Quaternion::new(value[3], value[0], value[1], value[2])
}

fn to_array(q: Quaternion<f32>) -> [f32; 4] {
    [q.v.x, q.v.y, q.v.z, q.s]
}

fn slerp(a: Quaternion<f32>, b: Quaternion<f32>, t: f32) -> Quaternion<f32> {
    // cgmath's slerp does not take the short path on its own
    let b = if a.dot(b) < 0.0 { -b } else { b };
    a.slerp(b, t).normalize()
}

fn squad(a: [f32; 4], out_tan: [f32; 4], in_tan: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    let outer = slerp(quaternion(a), quaternion(b), t);
    let inner = slerp(quaternion(out_tan), quaternion(in_tan), t);
    to_array(slerp(outer, inner, 2.0 * t * (1.0 - t)))
}

/// Samples `track` at `frame`, considering only keys inside `[start, end]`.
///
/// Returns `default` when the interval holds no keys. Before the first and after
/// the last key of the interval the value is held.
pub fn sample_track<T: Interpolate>(
    track: &Track<T>,
    frame: i32,
    start: i32,
    end: i32,
    default: T,
) -> T {
    let first = track.keys.partition_point(|key| key.frame < start);
    let last = track.keys.partition_point(|key| key.frame <= end);
    let keys = match track.keys.get(first..last) {
        Some(keys) if !keys.is_empty() => keys,
        _ => return default,
    };

    let next = keys.partition_point(|key| key.frame <= frame);
    if next == 0 {
        return keys[0].value;
    }
    if next == keys.len() {
        return keys[keys.len() - 1].value;
    }

    let from = &keys[next - 1];
    let to = &keys[next];
    let span = (to.frame - from.frame) as f32;
    let t = if span > 0.0 {
        (frame - from.frame) as f32 / span
    } else {
        0.0
    };

    match track.interpolation {
        Interpolation::None => from.value,
        Interpolation::Linear => T::lerp(from.value, to.value, t),
        Interpolation::Hermite => T::hermite(from.value, from.out_tan, to.in_tan, to.value, t),
        Interpolation::Bezier => T::bezier(from.value, from.out_tan, to.in_tan, to.value, t),
    }
}

/// The playback position of one instance, borrowed for the duration of a sample.
#[derive(Clone, Copy, Debug)]
pub struct Timeline<'a> {
    pub model: &'a Model,
    pub sequence: Option<&'a Sequence>,
    /// Absolute frame, inside the active sequence's interval.
    pub frame: u32,
    /// Frames elapsed since the instance was created; drives global sequences.
    pub global_frame: u32,
}

impl Timeline<'_> {
    pub fn sample<T: Interpolate>(&self, track: Option<&Track<T>>, default: T) -> T {
        let Some(track) = track else {
            return default;
        };
        if let Some(duration) = self
            .model
            .global_sequence_duration(track.global_sequence_id)
            .filter(|&duration| duration > 0)
        {
            let frame = (self.global_frame % duration) as i32;
            return sample_track(track, frame, 0, duration as i32, default);
        }
        match self.sequence {
            Some(sequence) => sample_track(
                track,
                self.frame as i32,
                sequence.start as i32,
                sequence.end as i32,
                default,
            ),
            None => default,
        }
    }
}
