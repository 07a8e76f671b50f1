//! Person clustering over face embeddings.
//!
//! Two mechanisms cooperate: a centroid index assigns each new face to its
//! nearest person incrementally, and a periodic full re-cluster corrects
//! the drift that online assignment accumulates. Persons are re-derivable
//! from the stored faces and may be rebuilt wholesale; user-given names
//! survive through majority vote.

use anyhow::Result;
use std::collections::HashMap;

use crate::db::Catalog;

/// Minimum cosine similarity to join an existing person.
pub const MATCH_THRESHOLD: f32 = 0.5;

/// Full re-cluster runs after this many new faces.
pub const RECLUSTER_EVERY: usize = 256;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

struct PersonSlot {
    person_id: i64,
    centroid: Vec<f32>,
    count: usize,
}

/// Where a new face should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Existing(i64),
    NewPerson,
}

/// Dense arena of person centroids. Protected by a writer lock at the
/// pipeline level; readers take the read side.
pub struct CentroidIndex {
    slots: Vec<PersonSlot>,
    by_person: HashMap<i64, usize>,
    new_faces: usize,
}

impl CentroidIndex {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            by_person: HashMap::new(),
            new_faces: 0,
        }
    }

    /// Rebuild from the stored faces.
    pub fn load(catalog: &Catalog) -> Result<Self> {
        let mut index = Self::new();
        for (_, person_id, embedding) in catalog.all_face_embeddings()? {
            if let Some(person_id) = person_id {
                index.add_member(person_id, &embedding);
            }
        }
        index.new_faces = 0;
        Ok(index)
    }

    pub fn person_count(&self) -> usize {
        self.slots.len()
    }

    /// Nearest person by cosine similarity against running centroids.
    pub fn assign(&self, embedding: &[f32]) -> Assignment {
        let best = self
            .slots
            .iter()
            .map(|slot| (slot.person_id, cosine_similarity(&slot.centroid, embedding)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        match best {
            Some((person_id, similarity)) if similarity >= MATCH_THRESHOLD => {
                Assignment::Existing(person_id)
            }
            _ => Assignment::NewPerson,
        }
    }

    /// Fold a face into a person's running centroid, creating the slot on
    /// first sight.
    pub fn add_member(&mut self, person_id: i64, embedding: &[f32]) {
        self.new_faces += 1;
        match self.by_person.get(&person_id) {
            Some(&slot_idx) => {
                let slot = &mut self.slots[slot_idx];
                let n = slot.count as f32;
                for (c, x) in slot.centroid.iter_mut().zip(embedding.iter()) {
                    *c = (*c * n + *x) / (n + 1.0);
                }
                slot.count += 1;
            }
            None => {
                self.by_person.insert(person_id, self.slots.len());
                self.slots.push(PersonSlot {
                    person_id,
                    centroid: embedding.to_vec(),
                    count: 1,
                });
            }
        }
    }

    /// True once enough faces have accumulated since the last rebuild.
    pub fn recluster_due(&self) -> bool {
        self.new_faces >= RECLUSTER_EVERY
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.by_person.clear();
        self.new_faces = 0;
    }
}

impl Default for CentroidIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Full greedy re-cluster over all stored embeddings.
///
/// Each unvisited face seeds a cluster and absorbs every face within the
/// similarity threshold. A cluster keeps the person id the plurality of
/// its members already had (preserving user-given names); otherwise a new
/// person row is created. The passed index is rebuilt to match.
pub fn recluster(catalog: &Catalog, index: &mut CentroidIndex) -> Result<usize> {
    let faces = catalog.all_face_embeddings()?;
    index.clear();
    if faces.is_empty() {
        catalog.prune_empty_persons()?;
        return Ok(0);
    }

    let mut clustered = vec![false; faces.len()];
    let mut clusters: Vec<Vec<usize>> = Vec::new();

    for i in 0..faces.len() {
        if clustered[i] {
            continue;
        }
        clustered[i] = true;
        let mut members = vec![i];
        for j in (i + 1)..faces.len() {
            if clustered[j] {
                continue;
            }
            if cosine_similarity(&faces[i].2, &faces[j].2) >= MATCH_THRESHOLD {
                clustered[j] = true;
                members.push(j);
            }
        }
        clusters.push(members);
    }

    let mut created = 0;
    for members in &clusters {
        // Plurality vote over previous assignments.
        let mut votes: HashMap<i64, usize> = HashMap::new();
        for &m in members {
            if let Some(pid) = faces[m].1 {
                *votes.entry(pid).or_default() += 1;
            }
        }
        let person_id = match votes.into_iter().max_by_key(|(_, n)| *n) {
            Some((pid, _)) => pid,
            None => {
                created += 1;
                catalog.create_person(Some(faces[members[0]].0))?
            }
        };

        for &m in members {
            if faces[m].1 != Some(person_id) {
                catalog.assign_face_person(faces[m].0, person_id)?;
            }
            index.add_member(person_id, &faces[m].2);
        }
        catalog.set_representative_face(person_id, faces[members[0]].0)?;
    }

    catalog.prune_empty_persons()?;
    index.new_faces = 0;
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::seed_file;
    use crate::db::NewFace;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_cosine_similarity_basics() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-4);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-4);
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[test]
    fn test_incremental_assignment() {
        let mut index = CentroidIndex::new();
        assert_eq!(index.assign(&unit(8, 0)), Assignment::NewPerson);

        index.add_member(1, &unit(8, 0));
        assert_eq!(index.assign(&unit(8, 0)), Assignment::Existing(1));
        // Orthogonal embedding starts a new person.
        assert_eq!(index.assign(&unit(8, 3)), Assignment::NewPerson);
    }

    #[test]
    fn test_centroid_tracks_running_mean() {
        let mut index = CentroidIndex::new();
        index.add_member(1, &[1.0, 0.0]);
        index.add_member(1, &[0.0, 1.0]);
        let slot = &index.slots[0];
        assert!((slot.centroid[0] - 0.5).abs() < 1e-6);
        assert!((slot.centroid[1] - 0.5).abs() < 1e-6);
        assert_eq!(slot.count, 2);
    }

    #[test]
    fn test_recluster_groups_similar_faces_and_keeps_names() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);

        let face = |hot: usize| NewFace {
            bbox: (0, 0, 10, 10),
            embedding: unit(16, hot),
            confidence: Some(0.9),
            crop_path: None,
        };
        // Two faces of one person, one of another.
        let ids = catalog
            .write_faces("aa", &[face(0), face(0), face(7)])
            .unwrap();

        // Pre-name the first face's person.
        let named = catalog.create_person(Some(ids[0])).unwrap();
        catalog.assign_face_person(ids[0], named).unwrap();
        catalog.rename_person(named, "Alice").unwrap();

        let mut index = CentroidIndex::new();
        let created = recluster(&catalog, &mut index).unwrap();
        assert_eq!(created, 1, "only the unseen person is new");
        assert_eq!(index.person_count(), 2);

        let persons = catalog.list_persons().unwrap();
        assert_eq!(persons.len(), 2);
        let alice = persons.iter().find(|p| p.name.as_deref() == Some("Alice"));
        assert_eq!(alice.unwrap().face_count, 2, "name survives re-clustering");
    }

    #[test]
    fn test_recluster_empty_catalog() {
        let catalog = Catalog::open_in_memory().unwrap();
        let mut index = CentroidIndex::new();
        assert_eq!(recluster(&catalog, &mut index).unwrap(), 0);
    }
}
