//! SQLite implementation of the store traits.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};
use tracing::{debug, warn};

use super::schema::SCHEMA;
use super::{ClusterStore, PhotoFilter, PhotoStore};
use crate::cluster::model::{Cluster, ClusterMembership, NewCluster, QualityTier};
use crate::error::{Error, Result};
use crate::photo::{format_timestamp, parse_timestamp, AiTags, CameraInfo, GeoPoint, PhotoRecord};

/// Upper bound on bound parameters per `IN (...)` list.
const ID_CHUNK: usize = 500;

const PHOTO_COLUMNS: &str = r#"
    SELECT p.id, p.path, p.perceptual_hash, p.taken_at,
           p.gps_latitude, p.gps_longitude,
           p.camera_make, p.camera_model, p.lens, p.focal_length, p.aperture,
           p.ai_tags, p.tags, e.embedding
    FROM photos p
    LEFT JOIN embeddings e ON e.photo_id = p.id
"#;

const CLUSTER_COLUMNS: &str = r#"
    SELECT c.id, c.representative_photo_id, c.member_count, c.avg_similarity,
           c.confidence_score, c.quality_tier, c.similarity_threshold
    FROM photo_clusters c
"#;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection itself usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Photo writes
    // ========================================================================

    /// Insert a photo, keeping `photo.id` when it is positive. The embedding,
    /// if any, is stored in the same transaction. Returns the row id.
    pub fn insert_photo(&self, photo: &PhotoRecord) -> Result<i64> {
        let camera = photo.camera.clone().unwrap_or_default();
        let ai_tags = photo
            .ai_tags
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let tags = if photo.tags.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&photo.tags)?)
        };

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            r#"
            INSERT INTO photos (
                id, path, perceptual_hash, taken_at, gps_latitude, gps_longitude,
                camera_make, camera_model, lens, focal_length, aperture, ai_tags, tags
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                (photo.id > 0).then_some(photo.id),
                photo.path,
                photo.perceptual_hash,
                photo.taken_at.as_ref().map(format_timestamp),
                photo.location.map(|l| l.latitude),
                photo.location.map(|l| l.longitude),
                camera.make,
                camera.model,
                camera.lens,
                camera.focal_length,
                camera.aperture,
                ai_tags,
                tags,
            ],
        )?;
        let id = tx.last_insert_rowid();
        if let Some(embedding) = &photo.embedding {
            write_embedding(&tx, id, embedding, "")?;
        }
        tx.commit()?;
        Ok(id)
    }

    /// Store an embedding for a photo, replacing any previous one.
    pub fn store_embedding(&self, photo_id: i64, embedding: &[f32], model_name: &str) -> Result<()> {
        write_embedding(&self.conn(), photo_id, embedding, model_name)
    }

    pub fn count_photos(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn query_photos(&self, filter: &PhotoFilter, ids: Option<&[i64]>) -> Result<Vec<PhotoRecord>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if filter.has_hash {
            clauses.push("p.perceptual_hash IS NOT NULL AND p.perceptual_hash != ''".to_string());
        }
        if filter.has_embedding {
            clauses.push("e.embedding IS NOT NULL".to_string());
        }
        if let Some((start, end)) = &filter.taken_between {
            clauses.push("p.taken_at BETWEEN ? AND ?".to_string());
            values.push(Value::Text(format_timestamp(start)));
            values.push(Value::Text(format_timestamp(end)));
        }
        if let Some(bbox) = &filter.within {
            let longitude = if bbox.crosses_antimeridian() {
                "(p.gps_longitude >= ? OR p.gps_longitude <= ?)"
            } else {
                "p.gps_longitude BETWEEN ? AND ?"
            };
            clauses.push(format!("p.gps_latitude BETWEEN ? AND ? AND {}", longitude));
            values.push(Value::Real(bbox.min_latitude));
            values.push(Value::Real(bbox.max_latitude));
            values.push(Value::Real(bbox.min_longitude));
            values.push(Value::Real(bbox.max_longitude));
        }
        if let Some(exclude) = filter.exclude_id {
            clauses.push("p.id != ?".to_string());
            values.push(Value::Integer(exclude));
        }
        if let Some(ids) = ids {
            let placeholders = vec!["?"; ids.len()].join(", ");
            clauses.push(format!("p.id IN ({})", placeholders));
            values.extend(ids.iter().map(|id| Value::Integer(*id)));
        }

        let mut sql = PHOTO_COLUMNS.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY p.id");

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), row_to_photo)?;

        let mut photos = Vec::new();
        for row in rows {
            match row {
                Ok(photo) => photos.push(photo),
                Err(e) => warn!(error = %e, "Skipping unreadable photo row"),
            }
        }
        Ok(photos)
    }
}

impl PhotoStore for SqliteStore {
    fn get_photo(&self, id: i64) -> Result<Option<PhotoRecord>> {
        let conn = self.conn();
        let sql = format!("{} WHERE p.id = ?", PHOTO_COLUMNS);
        let photo = conn.query_row(&sql, [id], row_to_photo).optional()?;
        Ok(photo)
    }

    fn list_photos(&self, filter: &PhotoFilter) -> Result<Vec<PhotoRecord>> {
        let Some(ids) = &filter.ids else {
            return self.query_photos(filter, None);
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut photos = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            photos.extend(self.query_photos(filter, Some(chunk))?);
        }
        photos.sort_by_key(|p| p.id);
        photos.dedup_by_key(|p| p.id);
        Ok(photos)
    }
}

impl ClusterStore for SqliteStore {
    fn clear_clusters(&self) -> Result<()> {
        self.conn().execute_batch(
            r#"
            DELETE FROM photo_cluster_members;
            DELETE FROM photo_clusters;
            "#,
        )?;
        debug!("Cleared photo clusters");
        Ok(())
    }

    fn insert_clusters(&self, clusters: &[NewCluster]) -> Result<Vec<i64>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let ids = write_clusters(&tx, clusters)?;
        tx.commit()?;
        Ok(ids)
    }

    fn replace_cluster(&self, cluster_id: i64, replacements: &[NewCluster]) -> Result<Vec<i64>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM photo_cluster_members WHERE cluster_id = ?",
            [cluster_id],
        )?;
        tx.execute("DELETE FROM photo_clusters WHERE id = ?", [cluster_id])?;
        let ids = write_clusters(&tx, replacements)?;
        tx.commit()?;
        Ok(ids)
    }

    fn oversized_clusters(&self, max_members: usize) -> Result<Vec<Cluster>> {
        let conn = self.conn();
        let sql = format!("{} WHERE c.member_count > ? ORDER BY c.id", CLUSTER_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let clusters = stmt
            .query_map([max_members as i64], row_to_cluster)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(clusters)
    }

    fn cluster_members(&self, cluster_id: i64) -> Result<Vec<ClusterMembership>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT cluster_id, photo_id, similarity_to_cluster
            FROM photo_cluster_members
            WHERE cluster_id = ?
            ORDER BY photo_id
            "#,
        )?;
        let members = stmt
            .query_map([cluster_id], |row| {
                Ok(ClusterMembership {
                    cluster_id: row.get(0)?,
                    photo_id: row.get(1)?,
                    similarity_to_cluster: row.get::<_, f64>(2)? as f32,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    fn cluster_for_photo(&self, photo_id: i64) -> Result<Option<Cluster>> {
        let conn = self.conn();
        let sql = format!(
            "{} JOIN photo_cluster_members m ON m.cluster_id = c.id WHERE m.photo_id = ?",
            CLUSTER_COLUMNS
        );
        let cluster = conn.query_row(&sql, [photo_id], row_to_cluster).optional()?;
        Ok(cluster)
    }

    fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let conn = self.conn();
        let sql = format!("{} ORDER BY c.id", CLUSTER_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let clusters = stmt
            .query_map([], row_to_cluster)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(clusters)
    }
}

fn write_embedding(
    conn: &Connection,
    photo_id: i64,
    embedding: &[f32],
    model_name: &str,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO embeddings (photo_id, embedding, embedding_dim, model_name, created_at)
        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
        "#,
        params![photo_id, embedding_to_bytes(embedding), embedding.len() as i64, model_name],
    )?;
    Ok(())
}

fn write_clusters(tx: &Transaction<'_>, clusters: &[NewCluster]) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(clusters.len());
    let mut insert_cluster = tx.prepare(
        r#"
        INSERT INTO photo_clusters (
            representative_photo_id, member_count, avg_similarity,
            confidence_score, quality_tier, similarity_threshold
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )?;
    let mut insert_member = tx.prepare(
        r#"
        INSERT INTO photo_cluster_members (photo_id, cluster_id, similarity_to_cluster)
        VALUES (?, ?, ?)
        "#,
    )?;

    for cluster in clusters {
        if cluster.member_count() < 2 {
            return Err(Error::InvalidParameter {
                name: "members",
                message: format!(
                    "a cluster needs at least 2 members, got {}",
                    cluster.member_count()
                ),
            });
        }

        insert_cluster.execute(params![
            cluster.representative_photo_id,
            cluster.member_count() as i64,
            cluster.avg_intra_similarity as f64,
            cluster.confidence_score as f64,
            cluster.quality_tier.as_str(),
            cluster.similarity_threshold as f64,
        ])?;
        let cluster_id = tx.last_insert_rowid();

        for (photo_id, similarity) in &cluster.members {
            insert_member.execute(params![photo_id, cluster_id, *similarity as f64])?;
        }
        ids.push(cluster_id);
    }
    Ok(ids)
}

fn row_to_photo(row: &Row<'_>) -> rusqlite::Result<PhotoRecord> {
    let id: i64 = row.get(0)?;
    let taken_at: Option<String> = row.get(3)?;
    let latitude: Option<f64> = row.get(4)?;
    let longitude: Option<f64> = row.get(5)?;

    let camera = CameraInfo {
        make: row.get(6)?,
        model: row.get(7)?,
        lens: row.get(8)?,
        focal_length: row.get(9)?,
        aperture: row.get(10)?,
    };
    let has_camera = camera.make.is_some()
        || camera.model.is_some()
        || camera.lens.is_some()
        || camera.focal_length.is_some()
        || camera.aperture.is_some();

    let ai_tags: Option<AiTags> = row
        .get::<_, Option<String>>(11)?
        .and_then(|json| parse_json(id, "ai_tags", &json));
    let tags: Vec<String> = row
        .get::<_, Option<String>>(12)?
        .and_then(|json| parse_json(id, "tags", &json))
        .unwrap_or_default();
    let embedding = row
        .get::<_, Option<Vec<u8>>>(13)?
        .and_then(|bytes| bytes_to_embedding(&bytes));

    Ok(PhotoRecord {
        id,
        path: row.get(1)?,
        perceptual_hash: row.get(2)?,
        embedding,
        taken_at: taken_at.as_deref().and_then(parse_timestamp),
        location: latitude.zip(longitude).map(|(lat, lng)| GeoPoint::new(lat, lng)),
        camera: has_camera.then_some(camera),
        ai_tags,
        tags,
    })
}

fn row_to_cluster(row: &Row<'_>) -> rusqlite::Result<Cluster> {
    let tier: String = row.get(5)?;
    Ok(Cluster {
        id: row.get(0)?,
        representative_photo_id: row.get(1)?,
        member_count: row.get::<_, i64>(2)? as usize,
        avg_intra_similarity: row.get::<_, f64>(3)? as f32,
        confidence_score: row.get::<_, f64>(4)? as f32,
        quality_tier: QualityTier::parse(&tier),
        similarity_threshold: row.get::<_, f64>(6)? as f32,
    })
}

fn parse_json<T: serde::de::DeserializeOwned>(photo_id: i64, column: &str, json: &str) -> Option<T> {
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(photo_id, column, error = %e, "Ignoring malformed JSON column");
            None
        }
    }
}

/// Convert an f32 slice to little-endian bytes for storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert stored bytes back to an f32 vector. `None` when the blob is not a
/// whole number of floats.
pub fn bytes_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
