use serde::{Deserialize, Serialize};

/// Human-readable identity name. Used as the key in both the gallery and the ledger.
pub type Identity = String;

/// Face embedding vector (512-dimensional for ArcFace, any length in tests).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two embeddings. Lower = more similar.
    ///
    /// Vectors of different length are compared over the shorter prefix.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Bounding box for a detected face in pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &FaceBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Ordered mapping from identity to its reference embedding.
///
/// Entries are only ever appended or replaced in place, never removed.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<(Identity, Embedding)>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. An existing identity keeps its position and gets the new embedding.
    pub fn insert(&mut self, identity: Identity, embedding: Embedding) {
        match self.entries.iter_mut().find(|(id, _)| *id == identity) {
            Some(entry) => entry.1 = embedding,
            None => self.entries.push((identity, embedding)),
        }
    }

    pub fn get(&self, identity: &str) -> Option<&Embedding> {
        self.entries
            .iter()
            .find(|(id, _)| id == identity)
            .map(|(_, e)| e)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.get(identity).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Identity, &Embedding)> {
        self.entries.iter().map(|(id, e)| (id, e))
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.entries.iter().map(|(id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
