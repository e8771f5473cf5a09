//! Marker definitions and per-frame observations.

use crate::{BodyId, Pt3, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named landmark rigidly attached to one body segment.
///
/// `offset` is expressed in the body frame at unit scale; it is scaled
/// component-wise by the body's scale when evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
    pub body: BodyId,
    pub offset: Vec3,
}

impl Marker {
    pub fn new(name: impl Into<String>, body: BodyId, offset: Vec3) -> Self {
        Self {
            name: name.into(),
            body,
            offset,
        }
    }
}

/// Observed marker positions for one frame. Missing entries are occluded.
pub type MarkerFrame = BTreeMap<String, Pt3>;

/// Full observation sequence, one [`MarkerFrame`] per timestep.
pub type MarkerSequence = Vec<MarkerFrame>;

/// Names of the markers visible in `frame`, restricted to the marker set.
pub fn visible_markers<'a>(markers: &'a [Marker], frame: &MarkerFrame) -> Vec<&'a Marker> {
    markers
        .iter()
        .filter(|m| frame.contains_key(&m.name))
        .collect()
}
