pub const POSTGRES_SCHEMA: &str = r#"
-- PostgreSQL schema for Sharpic

CREATE TABLE IF NOT EXISTS account (
    username TEXT PRIMARY KEY,
    email TEXT,
    password_hash TEXT,
    created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'utc', 'YYYY-MM-DD HH24:MI:SS')
);

CREATE TABLE IF NOT EXISTS album (
    id BIGSERIAL PRIMARY KEY,
    owner TEXT NOT NULL REFERENCES account(username),
    title TEXT NOT NULL,
    is_default BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'utc', 'YYYY-MM-DD HH24:MI:SS')
);

CREATE INDEX IF NOT EXISTS idx_album_owner ON album(owner);
CREATE UNIQUE INDEX IF NOT EXISTS idx_album_default ON album(owner) WHERE is_default;

CREATE TABLE IF NOT EXISTS image (
    id BIGSERIAL PRIMARY KEY,
    owner TEXT NOT NULL REFERENCES account(username),
    filename TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size_bytes BIGINT NOT NULL,
    orientation INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'utc', 'YYYY-MM-DD HH24:MI:SS')
);

CREATE INDEX IF NOT EXISTS idx_image_owner ON image(owner);
CREATE INDEX IF NOT EXISTS idx_image_hash ON image(content_hash);

CREATE TABLE IF NOT EXISTS album_image (
    seq BIGSERIAL PRIMARY KEY,
    album_id BIGINT NOT NULL REFERENCES album(id) ON DELETE CASCADE,
    image_id BIGINT NOT NULL REFERENCES image(id) ON DELETE CASCADE,
    added_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'utc', 'YYYY-MM-DD HH24:MI:SS'),
    UNIQUE (album_id, image_id)
);

CREATE INDEX IF NOT EXISTS idx_album_image_image ON album_image(image_id);

CREATE TABLE IF NOT EXISTS processed_image (
    id BIGSERIAL PRIMARY KEY,
    owner TEXT NOT NULL,
    image_id BIGINT NOT NULL REFERENCES image(id) ON DELETE CASCADE,
    content_hash TEXT NOT NULL,
    size_bytes BIGINT NOT NULL,
    orientation INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT to_char(now() AT TIME ZONE 'utc', 'YYYY-MM-DD HH24:MI:SS'),
    UNIQUE (image_id, orientation)
);

CREATE INDEX IF NOT EXISTS idx_processed_image_owner ON processed_image(owner, image_id);
"#;
