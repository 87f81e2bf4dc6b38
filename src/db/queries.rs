pub const CREATE_LOCATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bus_locations (
    id BIGSERIAL PRIMARY KEY,
    bus_id VARCHAR(50) NOT NULL DEFAULT 'bus_001',
    latitude DOUBLE PRECISION NOT NULL,
    longitude DOUBLE PRECISION NOT NULL,
    speed DOUBLE PRECISION NULL,
    accuracy DOUBLE PRECISION NULL,
    bearing DOUBLE PRECISION NULL,
    recorded_at TIMESTAMPTZ NOT NULL
);
"#;

pub const CREATE_LOCATIONS_BUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS bus_locations_bus_id_idx ON bus_locations (bus_id, id DESC);
"#;

/// Serializes appends across every process sharing the database; released on
/// commit or rollback.
pub const LOCK_APPEND: &str = r#"
SELECT pg_advisory_xact_lock($1);
"#;

/// Stamps `recorded_at` no earlier than the previous row so time order
/// always follows id order.
pub const INSERT_LOCATION: &str = r#"
INSERT INTO bus_locations (bus_id, latitude, longitude, speed, accuracy, bearing, recorded_at)
VALUES (
    $1, $2, $3, $4, $5, $6,
    GREATEST(
        clock_timestamp(),
        COALESCE((SELECT recorded_at FROM bus_locations ORDER BY id DESC LIMIT 1), '-infinity'::timestamptz)
    )
)
RETURNING id, bus_id, latitude, longitude, speed, accuracy, bearing, recorded_at;
"#;

pub const SELECT_LATEST: &str = r#"
SELECT id, bus_id, latitude, longitude, speed, accuracy, bearing, recorded_at
FROM bus_locations
WHERE ($1::text IS NULL OR bus_id = $1)
ORDER BY id DESC
LIMIT 1;
"#;

/// Newest `$2` rows, handed back oldest first.
pub const SELECT_HISTORY: &str = r#"
SELECT id, bus_id, latitude, longitude, speed, accuracy, bearing, recorded_at
FROM (
    SELECT id, bus_id, latitude, longitude, speed, accuracy, bearing, recorded_at
    FROM bus_locations
    WHERE ($1::text IS NULL OR bus_id = $1)
    ORDER BY id DESC
    LIMIT $2
) recent
ORDER BY id ASC;
"#;
