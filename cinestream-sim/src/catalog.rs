//! Content published into the simulated swarm.

use bytes::{Bytes, BytesMut};
use cinestream_core::ContentId;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One content item: a name and the bytes of each file.
#[derive(Debug, Clone)]
pub struct SimContent {
    pub name: String,
    pub files: Vec<(String, Bytes)>,
}

impl SimContent {
    pub fn new(name: impl Into<String>, files: Vec<(String, Bytes)>) -> Self {
        Self {
            name: name.into(),
            files,
        }
    }

    /// Single-file item.
    pub fn single(name: impl Into<String>, path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self::new(name, vec![(path.into(), data.into())])
    }

    /// Single-file item of `length` pseudo-random bytes derived from `seed`.
    pub fn synthetic(
        name: impl Into<String>,
        path: impl Into<String>,
        length: usize,
        seed: u64,
    ) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut data = BytesMut::zeroed(length);
        rng.fill_bytes(&mut data);
        Self::single(name, path, data.freeze())
    }

    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|(_, data)| data.len() as u64).sum()
    }

    /// `(path, length)` pairs in file order.
    pub fn layout(&self) -> Vec<(String, u64)> {
        self.files
            .iter()
            .map(|(path, data)| (path.clone(), data.len() as u64))
            .collect()
    }

    /// Concatenation of all files, the swarm's piece space.
    pub fn concatenated(&self) -> Bytes {
        match self.files.as_slice() {
            [(_, only)] => only.clone(),
            files => {
                let mut joined = BytesMut::with_capacity(self.total_length() as usize);
                for (_, data) in files {
                    joined.extend_from_slice(data);
                }
                joined.freeze()
            }
        }
    }
}

/// Items published by development mode.
pub fn demo_catalog() -> Vec<(ContentId, SimContent)> {
    let items = [
        ("DEMO0001", SimContent::synthetic("Demo Feature", "demo-feature.mkv", 24 * 1024 * 1024, 1)),
        (
            "DEMO0002",
            SimContent::new(
                "Demo Series S01",
                vec![
                    ("Demo Series S01/notes.txt".to_string(), Bytes::from_static(b"simulated series\n")),
                    (
                        "Demo Series S01/episode01.mp4".to_string(),
                        SimContent::synthetic("", "", 8 * 1024 * 1024, 2).concatenated(),
                    ),
                    (
                        "Demo Series S01/episode02.mp4".to_string(),
                        SimContent::synthetic("", "", 8 * 1024 * 1024, 3).concatenated(),
                    ),
                ],
            ),
        ),
    ];

    items
        .into_iter()
        .filter_map(|(id, content)| ContentId::parse(id).ok().map(|id| (id, content)))
        .collect()
}
