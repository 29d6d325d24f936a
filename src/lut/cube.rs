use std::fmt;
use std::path::PathBuf;

/// An immutable 3D color lookup table.
///
/// Nodes are stored red-fastest: index = r + g·N + b·N².
#[derive(Clone, PartialEq)]
pub struct ColorCube {
    size: usize,
    nodes: Vec<[f32; 3]>,
    domain_min: [f32; 3],
    domain_max: [f32; 3],
    title: Option<String>,
    source: Option<PathBuf>,
}

impl ColorCube {
    /// Build a cube from red-fastest node values. The caller guarantees
    /// `nodes.len() == size³` and `size >= 2`.
    pub(crate) fn from_nodes(size: usize, nodes: Vec<[f32; 3]>) -> Self {
        debug_assert_eq!(nodes.len(), size * size * size);
        Self {
            size,
            nodes,
            domain_min: [0.0; 3],
            domain_max: [1.0; 3],
            title: None,
            source: None,
        }
    }

    /// Identity cube of the given edge length
    pub fn identity(size: usize) -> Self {
        let size = size.max(2);
        let scale = (size - 1) as f32;
        let mut nodes = Vec::with_capacity(size * size * size);
        for b in 0..size {
            for g in 0..size {
                for r in 0..size {
                    nodes.push([r as f32 / scale, g as f32 / scale, b as f32 / scale]);
                }
            }
        }
        Self::from_nodes(size, nodes)
    }

    pub(crate) fn with_domain(mut self, min: [f32; 3], max: [f32; 3]) -> Self {
        self.domain_min = min;
        self.domain_max = max;
        self
    }

    pub(crate) fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub(crate) fn with_source(mut self, source: PathBuf) -> Self {
        self.source = Some(source);
        self
    }

    /// Edge length N of the cube
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// File the cube was loaded from
    pub fn source(&self) -> Option<&PathBuf> {
        self.source.as_ref()
    }

    /// Stored value at integer grid coordinates
    pub fn node(&self, r: usize, g: usize, b: usize) -> [f32; 3] {
        self.nodes[r + g * self.size + b * self.size * self.size]
    }

    /// Grid coordinate and blend weight along one axis for a normalized input
    pub(crate) fn axis_position(&self, value: f32) -> (usize, f32) {
        let max_index = (self.size - 1) as f32;
        let scaled = value.clamp(0.0, 1.0) * max_index;
        let lower = (scaled.floor() as usize).min(self.size - 2);
        (lower, scaled - lower as f32)
    }

    /// Map one channel of an input value from the cube's domain onto 0..1
    pub(crate) fn normalize_channel(&self, channel: usize, value: f32) -> f32 {
        let span = self.domain_max[channel] - self.domain_min[channel];
        if span > 0.0 {
            (value - self.domain_min[channel]) / span
        } else {
            value
        }
    }

    fn normalize(&self, rgb: [f32; 3]) -> [f32; 3] {
        [
            self.normalize_channel(0, rgb[0]),
            self.normalize_channel(1, rgb[1]),
            self.normalize_channel(2, rgb[2]),
        ]
    }

    /// Trilinear sample: blend the 8 grid points surrounding `rgb`
    pub fn sample(&self, rgb: [f32; 3]) -> [f32; 3] {
        let [nr, ng, nb] = self.normalize(rgb);
        let (r0, fr) = self.axis_position(nr);
        let (g0, fg) = self.axis_position(ng);
        let (b0, fb) = self.axis_position(nb);
        self.blend(r0, g0, b0, fr, fg, fb)
    }

    /// Blend the cell whose lower corner is (r0, g0, b0)
    pub(crate) fn blend(
        &self,
        r0: usize,
        g0: usize,
        b0: usize,
        fr: f32,
        fg: f32,
        fb: f32,
    ) -> [f32; 3] {
        let c000 = self.node(r0, g0, b0);
        let c100 = self.node(r0 + 1, g0, b0);
        let c010 = self.node(r0, g0 + 1, b0);
        let c110 = self.node(r0 + 1, g0 + 1, b0);
        let c001 = self.node(r0, g0, b0 + 1);
        let c101 = self.node(r0 + 1, g0, b0 + 1);
        let c011 = self.node(r0, g0 + 1, b0 + 1);
        let c111 = self.node(r0 + 1, g0 + 1, b0 + 1);

        let mut out = [0.0f32; 3];
        for channel in 0..3 {
            let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
            let x00 = lerp(c000[channel], c100[channel], fr);
            let x10 = lerp(c010[channel], c110[channel], fr);
            let x01 = lerp(c001[channel], c101[channel], fr);
            let x11 = lerp(c011[channel], c111[channel], fr);
            let y0 = lerp(x00, x10, fg);
            let y1 = lerp(x01, x11, fg);
            out[channel] = lerp(y0, y1, fb);
        }
        out
    }
}

impl fmt::Debug for ColorCube {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColorCube")
            .field("size", &self.size)
            .field("title", &self.title)
            .field("source", &self.source)
            .finish()
    }
}
