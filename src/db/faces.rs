//! Faces and persons.

use anyhow::Result;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::ledger::ledger_done_tx;
use super::Catalog;
use crate::pipeline::Stage;

/// Face embeddings are stored as little-endian f32 blobs.
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[derive(Debug, Clone)]
pub struct NewFace {
    pub bbox: (i64, i64, i64, i64),
    pub embedding: Vec<f32>,
    pub confidence: Option<f64>,
    pub crop_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceRow {
    pub id: i64,
    pub file_id: String,
    pub bbox_x: i64,
    pub bbox_y: i64,
    pub bbox_w: i64,
    pub bbox_h: i64,
    pub person_id: Option<i64>,
    pub crop_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonSummary {
    pub id: i64,
    pub name: Option<String>,
    pub face_count: i64,
    pub photo_count: i64,
    pub representative_crop: Option<String>,
}

impl Catalog {
    /// Replace the detected faces for a file and mark the stage done.
    /// Returns the stored face row ids in input order.
    pub fn write_faces(&self, file_id: &str, faces: &[NewFace]) -> Result<Vec<i64>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM faces WHERE file_id = ?1", params![file_id])?;
        let mut ids = Vec::with_capacity(faces.len());
        for face in faces {
            tx.execute(
                "INSERT INTO faces
                     (file_id, bbox_x, bbox_y, bbox_w, bbox_h, embedding, confidence, crop_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    file_id,
                    face.bbox.0,
                    face.bbox.1,
                    face.bbox.2,
                    face.bbox.3,
                    embedding_to_blob(&face.embedding),
                    face.confidence,
                    face.crop_path
                ],
            )?;
            ids.push(tx.last_insert_rowid());
        }
        ledger_done_tx(&tx, file_id, Stage::Faces)?;
        tx.commit()?;
        Ok(ids)
    }

    /// Every stored embedding with its current person assignment, for
    /// loading the centroid index and for full re-clustering.
    pub fn all_face_embeddings(&self) -> Result<Vec<(i64, Option<i64>, Vec<f32>)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, person_id, embedding FROM faces")?;
        let rows = stmt
            .query_map([], |row| {
                let blob: Vec<u8> = row.get(2)?;
                Ok((row.get(0)?, row.get(1)?, blob_to_embedding(&blob)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn create_person(&self, representative_face_id: Option<i64>) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO persons (representative_face_id) VALUES (?1)",
            params![representative_face_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn assign_face_person(&self, face_id: i64, person_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE faces SET person_id = ?2 WHERE id = ?1",
            params![face_id, person_id],
        )?;
        Ok(())
    }

    pub fn set_representative_face(&self, person_id: i64, face_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE persons SET representative_face_id = ?2 WHERE id = ?1",
            params![person_id, face_id],
        )?;
        Ok(())
    }

    pub fn rename_person(&self, person_id: i64, name: &str) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE persons SET name = ?2 WHERE id = ?1",
            params![person_id, name],
        )?;
        Ok(updated > 0)
    }

    /// Merge persons: all faces of `from` move to `into`, then the empty
    /// person rows are removed.
    pub fn merge_persons(&self, into: i64, from: &[i64]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for source in from {
            if *source == into {
                continue;
            }
            tx.execute(
                "UPDATE faces SET person_id = ?2 WHERE person_id = ?1",
                params![source, into],
            )?;
            tx.execute("DELETE FROM persons WHERE id = ?1", params![source])?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Drop person rows that no longer have any faces. Used after a full
    /// re-cluster.
    pub fn prune_empty_persons(&self) -> Result<usize> {
        let count = self.conn().execute(
            "DELETE FROM persons
             WHERE id NOT IN (SELECT DISTINCT person_id FROM faces WHERE person_id IS NOT NULL)",
            [],
        )?;
        Ok(count)
    }

    pub fn list_persons(&self) -> Result<Vec<PersonSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT p.id, p.name,
                    COUNT(f.id) AS face_count,
                    COUNT(DISTINCT f.file_id) AS photo_count,
                    (SELECT crop_path FROM faces r WHERE r.id = p.representative_face_id)
             FROM persons p
             LEFT JOIN faces f ON f.person_id = p.id
             GROUP BY p.id
             HAVING face_count > 0
             ORDER BY face_count DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PersonSummary {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    face_count: row.get(2)?,
                    photo_count: row.get(3)?,
                    representative_crop: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_person(&self, person_id: i64) -> Result<Option<PersonSummary>> {
        let conn = self.conn();
        let person = conn
            .query_row(
                "SELECT p.id, p.name,
                        COUNT(f.id), COUNT(DISTINCT f.file_id),
                        (SELECT crop_path FROM faces r WHERE r.id = p.representative_face_id)
                 FROM persons p
                 LEFT JOIN faces f ON f.person_id = p.id
                 WHERE p.id = ?1
                 GROUP BY p.id",
                params![person_id],
                |row| {
                    Ok(PersonSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        face_count: row.get(2)?,
                        photo_count: row.get(3)?,
                        representative_crop: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(person)
    }

    pub fn faces_for_file(&self, file_id: &str) -> Result<Vec<FaceRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, file_id, bbox_x, bbox_y, bbox_w, bbox_h, person_id, crop_path
             FROM faces WHERE file_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![file_id], |row| {
                Ok(FaceRow {
                    id: row.get(0)?,
                    file_id: row.get(1)?,
                    bbox_x: row.get(2)?,
                    bbox_y: row.get(3)?,
                    bbox_w: row.get(4)?,
                    bbox_h: row.get(5)?,
                    person_id: row.get(6)?,
                    crop_path: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::seed_file;

    #[test]
    fn test_embedding_blob_roundtrip() {
        let embedding: Vec<f32> = (0..512).map(|i| (i as f32) * 0.001 - 0.25).collect();
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 512 * 4);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[test]
    fn test_write_faces_replaces_and_marks_done() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);

        let face = NewFace {
            bbox: (10, 20, 30, 40),
            embedding: vec![0.5; 512],
            confidence: Some(0.9),
            crop_path: Some("faces/aa/aa_face0.webp".into()),
        };
        let first = catalog.write_faces("aa", &[face.clone()]).unwrap();
        assert_eq!(first.len(), 1);
        assert!(!catalog.stage_needed("aa", Stage::Faces).unwrap());

        // A second commit replaces rather than accumulates.
        catalog.write_faces("aa", &[face.clone(), face]).unwrap();
        assert_eq!(catalog.faces_for_file("aa").unwrap().len(), 2);
    }

    #[test]
    fn test_merge_persons_moves_faces() {
        let catalog = Catalog::open_in_memory().unwrap();
        seed_file(&catalog, "aa", "a.jpg", 1, 0);
        seed_file(&catalog, "bb", "b.jpg", 1, 0);

        let f1 = catalog
            .write_faces(
                "aa",
                &[NewFace {
                    bbox: (0, 0, 10, 10),
                    embedding: vec![0.1; 4],
                    confidence: None,
                    crop_path: None,
                }],
            )
            .unwrap()[0];
        let f2 = catalog
            .write_faces(
                "bb",
                &[NewFace {
                    bbox: (0, 0, 10, 10),
                    embedding: vec![0.2; 4],
                    confidence: None,
                    crop_path: None,
                }],
            )
            .unwrap()[0];

        let alice = catalog.create_person(Some(f1)).unwrap();
        let dupe = catalog.create_person(Some(f2)).unwrap();
        catalog.assign_face_person(f1, alice).unwrap();
        catalog.assign_face_person(f2, dupe).unwrap();
        catalog.rename_person(alice, "Alice").unwrap();

        catalog.merge_persons(alice, &[dupe]).unwrap();
        let persons = catalog.list_persons().unwrap();
        assert_eq!(persons.len(), 1);
        assert_eq!(persons[0].face_count, 2);
        assert_eq!(persons[0].name.as_deref(), Some("Alice"));
    }
}
