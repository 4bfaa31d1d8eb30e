pub const SCHEMA: &str = r#"
-- Photos table: metadata consumed by the similarity engine
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT,

    -- Hex-encoded perceptual hash
    perceptual_hash TEXT,

    -- EXIF data
    taken_at TEXT,           -- "YYYY-MM-DDTHH:MM:SS"
    gps_latitude REAL,
    gps_longitude REAL,
    camera_make TEXT,
    camera_model TEXT,
    lens TEXT,
    focal_length REAL,
    aperture REAL,

    -- Vision model output
    ai_tags TEXT,            -- JSON object
    tags TEXT                -- JSON array
);

CREATE INDEX IF NOT EXISTS idx_photos_perceptual ON photos(perceptual_hash);
CREATE INDEX IF NOT EXISTS idx_photos_taken_at ON photos(taken_at);
CREATE INDEX IF NOT EXISTS idx_photos_gps ON photos(gps_latitude, gps_longitude);

-- Image embeddings
CREATE TABLE IF NOT EXISTS embeddings (
    photo_id INTEGER PRIMARY KEY,
    embedding BLOB NOT NULL,  -- float32 array stored as little-endian bytes
    embedding_dim INTEGER NOT NULL,
    model_name TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);

-- Photo clusters from the last clustering pass
CREATE TABLE IF NOT EXISTS photo_clusters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,  -- never reused, so refinements get fresh ids
    representative_photo_id INTEGER,
    member_count INTEGER NOT NULL,
    avg_similarity REAL NOT NULL,
    confidence_score REAL NOT NULL,
    quality_tier TEXT NOT NULL,             -- 'high', 'medium' or 'low'
    similarity_threshold REAL NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (representative_photo_id) REFERENCES photos(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_photo_clusters_size ON photo_clusters(member_count);

-- Photo to cluster mapping; a photo is in at most one cluster
CREATE TABLE IF NOT EXISTS photo_cluster_members (
    photo_id INTEGER NOT NULL UNIQUE,
    cluster_id INTEGER NOT NULL,
    similarity_to_cluster REAL NOT NULL,
    PRIMARY KEY (photo_id, cluster_id),
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE,
    FOREIGN KEY (cluster_id) REFERENCES photo_clusters(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_photo_cluster_members_cluster ON photo_cluster_members(cluster_id);
"#;
