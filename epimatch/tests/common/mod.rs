#![allow(dead_code)]

use epimatch::descriptor_buffer::{Descriptor, DescriptorBuffer, DESCRIPTOR_LEN};
use epimatch::keypoint::Keypoint;
use epimatch::{ImageFeatures, Match};
use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;

/// Two images whose true correspondences are known.
pub struct SyntheticPair {
    pub source: ImageFeatures,
    pub reference: ImageFeatures,
    pub truth: HashSet<Match>,
}

impl SyntheticPair {
    /// Fraction of true correspondences found, and number of found matches
    /// that are not true correspondences.
    pub fn score(&self, found: &[Match]) -> (f64, usize) {
        let hits = found.iter().filter(|m| self.truth.contains(m)).count();
        let recall = hits as f64 / self.truth.len() as f64;
        (recall, found.len() - hits)
    }
}

fn random_descriptor(rng: &mut StdRng) -> Descriptor {
    let mut d = [0u8; DESCRIPTOR_LEN];
    rng.fill(&mut d[..]);
    d
}

/// `d` with every byte moved by at most 2.
fn perturbed(d: &Descriptor, rng: &mut StdRng) -> Descriptor {
    let mut out = *d;
    for v in out.iter_mut() {
        *v = (*v as i32 + rng.random_range(-2..=2)).clamp(0, 255) as u8;
    }
    out
}

fn random_position(rng: &mut StdRng) -> (f32, f32) {
    (
        rng.random_range(20.0..WIDTH as f32 - 20.0),
        rng.random_range(20.0..HEIGHT as f32 - 20.0),
    )
}

/// Source-position, reference-position pairs become true correspondences;
/// `noise` unrelated features are added to each image. Both images are
/// shuffled so that true matches do not share indices.
fn build_pair(
    rng: &mut StdRng,
    correspondences: &[((f32, f32), (f32, f32))],
    noise: usize,
) -> SyntheticPair {
    let mut source: Vec<(Keypoint, Descriptor, Option<usize>)> = Vec::new();
    let mut reference: Vec<(Keypoint, Descriptor, Option<usize>)> = Vec::new();

    for (tag, &(p, q)) in correspondences.iter().enumerate() {
        let descriptor = random_descriptor(rng);
        source.push((Keypoint::new(p.0, p.1), descriptor, Some(tag)));
        reference.push((Keypoint::new(q.0, q.1), perturbed(&descriptor, rng), Some(tag)));
    }
    for _ in 0..noise {
        let (x, y) = random_position(rng);
        source.push((Keypoint::new(x, y), random_descriptor(rng), None));
        let (x, y) = random_position(rng);
        reference.push((Keypoint::new(x, y), random_descriptor(rng), None));
    }
    source.shuffle(rng);
    reference.shuffle(rng);

    let mut reference_of_tag = vec![0usize; correspondences.len()];
    for (r, entry) in reference.iter().enumerate() {
        if let Some(tag) = entry.2 {
            reference_of_tag[tag] = r;
        }
    }
    let truth = source
        .iter()
        .enumerate()
        .filter_map(|(s, entry)| entry.2.map(|tag| Match::new(s, reference_of_tag[tag])))
        .collect();

    let into_features = |entries: Vec<(Keypoint, Descriptor, Option<usize>)>| {
        let keypoints = entries.iter().map(|e| e.0).collect();
        let descriptors = DescriptorBuffer::from_descriptors(entries.iter().map(|e| e.1));
        ImageFeatures::new(WIDTH, HEIGHT, keypoints, descriptors).unwrap()
    };
    SyntheticPair {
        source: into_features(source),
        reference: into_features(reference),
        truth,
    }
}

fn inside(p: (f64, f64), margin: f64) -> bool {
    p.0 >= margin && p.1 >= margin && p.0 <= WIDTH as f64 - margin && p.1 <= HEIGHT as f64 - margin
}

/// A planar scene: reference positions are the source positions under a
/// rotation by five degrees and a 2% zoom about the image centre, followed by
/// a shift of `(8, -6)`.
pub fn homography_pair(seed: u64, true_points: usize, noise: usize) -> SyntheticPair {
    let mut rng = StdRng::seed_from_u64(seed);
    let (cx, cy) = (WIDTH as f64 / 2.0, HEIGHT as f64 / 2.0);
    let (sin, cos) = 5f64.to_radians().sin_cos();
    let s = 1.02;
    #[rustfmt::skip]
    let h = Matrix3::new(
        1.0, 0.0, cx + 8.0,
        0.0, 1.0, cy - 6.0,
        0.0, 0.0, 1.0,
    ) * Matrix3::new(
        s * cos, -s * sin, 0.0,
        s * sin, s * cos, 0.0,
        0.0, 0.0, 1.0,
    ) * Matrix3::new(
        1.0, 0.0, -cx,
        0.0, 1.0, -cy,
        0.0, 0.0, 1.0,
    );

    let mut correspondences = Vec::new();
    while correspondences.len() < true_points {
        let p = (rng.random_range(60.0..580.0), rng.random_range(60.0..420.0));
        let q = h * Vector3::new(p.0, p.1, 1.0);
        let q = (q.x / q.z, q.y / q.z);
        if inside(q, 40.0) {
            correspondences.push(((p.0 as f32, p.1 as f32), (q.0 as f32, q.1 as f32)));
        }
    }
    build_pair(&mut rng, &correspondences, noise)
}

/// A general scene: random 3D points seen by two cameras a short baseline
/// apart.
pub fn two_view_pair(seed: u64, true_points: usize, noise: usize) -> SyntheticPair {
    let mut rng = StdRng::seed_from_u64(seed);
    let k = Matrix3::new(500.0, 0.0, 320.0, 0.0, 500.0, 240.0, 0.0, 0.0, 1.0);
    let rotation = Rotation3::from_euler_angles(0.01, -0.05, 0.02);
    let translation = Vector3::new(0.5, 0.08, 0.1);
    let project = |p: Vector3<f64>| {
        let x = k * p;
        (x.x / x.z, x.y / x.z)
    };

    let mut correspondences = Vec::new();
    while correspondences.len() < true_points {
        let world = Point3::new(
            rng.random_range(-2.5..2.5),
            rng.random_range(-2.0..2.0),
            rng.random_range(5.0..10.0),
        );
        let p = project(world.coords);
        let q = project(rotation * world.coords + translation);
        if inside(p, 40.0) && inside(q, 40.0) {
            correspondences.push(((p.0 as f32, p.1 as f32), (q.0 as f32, q.1 as f32)));
        }
    }
    build_pair(&mut rng, &correspondences, noise)
}
