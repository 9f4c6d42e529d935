pub const SCHEMA: &str = r#"
-- Accounts: one row per owner
CREATE TABLE IF NOT EXISTS account (
    username TEXT PRIMARY KEY,
    email TEXT,
    password_hash TEXT,   -- opaque digest produced by the auth layer
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Albums, including each owner's default album
CREATE TABLE IF NOT EXISTS album (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    title TEXT NOT NULL,
    is_default INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (owner) REFERENCES account(username)
);

CREATE INDEX IF NOT EXISTS idx_album_owner ON album(owner);
CREATE UNIQUE INDEX IF NOT EXISTS idx_album_default ON album(owner) WHERE is_default = 1;

-- Ingested originals; content_hash keys the blob in the object store
CREATE TABLE IF NOT EXISTS image (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    filename TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    orientation INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (owner) REFERENCES account(username)
);

CREATE INDEX IF NOT EXISTS idx_image_owner ON image(owner);
CREATE INDEX IF NOT EXISTS idx_image_hash ON image(content_hash);

-- Album membership; seq gives a stable listing order
CREATE TABLE IF NOT EXISTS album_image (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    album_id INTEGER NOT NULL,
    image_id INTEGER NOT NULL,
    added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (album_id, image_id),
    FOREIGN KEY (album_id) REFERENCES album(id) ON DELETE CASCADE,
    FOREIGN KEY (image_id) REFERENCES image(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_album_image_image ON album_image(image_id);

-- Derived images, cached per source image and orientation
CREATE TABLE IF NOT EXISTS processed_image (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    image_id INTEGER NOT NULL,
    content_hash TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    orientation INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (image_id, orientation),
    FOREIGN KEY (image_id) REFERENCES image(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_processed_image_owner ON processed_image(owner, image_id);
"#;
