//! Table layout and seed data of a city-model database.

use citydb_core::Sequence;
use rusqlite::Transaction;

use super::SqliteAdapterError;

const TABLES: &str = "
CREATE TABLE IF NOT EXISTS database_srs (
    srid INTEGER NOT NULL,
    srs_name TEXT
);
CREATE TABLE IF NOT EXISTS srs_transform (
    source_srid INTEGER NOT NULL,
    target_srid INTEGER NOT NULL,
    matrix TEXT NOT NULL,
    PRIMARY KEY (source_srid, target_srid)
);
CREATE TABLE IF NOT EXISTS sequences (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS namespace (
    alias TEXT PRIMARY KEY,
    uri TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS objectclass (
    id INTEGER PRIMARY KEY,
    namespace_alias TEXT NOT NULL REFERENCES namespace (alias),
    classname TEXT NOT NULL,
    UNIQUE (namespace_alias, classname)
);
CREATE TABLE IF NOT EXISTS feature (
    id INTEGER PRIMARY KEY,
    objectclass_id INTEGER NOT NULL REFERENCES objectclass (id),
    objectid TEXT,
    envelope_xmin REAL,
    envelope_ymin REAL,
    envelope_zmin REAL,
    envelope_xmax REAL,
    envelope_ymax REAL,
    envelope_zmax REAL,
    envelope_srid INTEGER,
    creation_date INTEGER,
    termination_date INTEGER
);
CREATE INDEX IF NOT EXISTS feature_objectid_idx ON feature (objectid);
CREATE TABLE IF NOT EXISTS address (
    id INTEGER PRIMARY KEY,
    objectid TEXT,
    street TEXT,
    house_number TEXT,
    po_box TEXT,
    zip_code TEXT,
    city TEXT,
    state TEXT,
    country TEXT
);
CREATE INDEX IF NOT EXISTS address_objectid_idx ON address (objectid);
CREATE TABLE IF NOT EXISTS tex_image (
    id INTEGER PRIMARY KEY,
    objectid TEXT,
    uri TEXT NOT NULL,
    mime_type TEXT,
    data BLOB
);
CREATE INDEX IF NOT EXISTS tex_image_objectid_idx ON tex_image (objectid);
CREATE TABLE IF NOT EXISTS geometry_data (
    id INTEGER PRIMARY KEY,
    objectid TEXT,
    feature_id INTEGER REFERENCES feature (id),
    is_implicit INTEGER NOT NULL,
    geometry TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS geometry_data_objectid_idx ON geometry_data (objectid);
CREATE TABLE IF NOT EXISTS implicit_geometry (
    id INTEGER PRIMARY KEY,
    objectid TEXT,
    relative_geometry_id INTEGER REFERENCES geometry_data (id),
    library_object TEXT,
    mime_type TEXT
);
CREATE INDEX IF NOT EXISTS implicit_geometry_objectid_idx ON implicit_geometry (objectid);
CREATE TABLE IF NOT EXISTS appearance (
    id INTEGER PRIMARY KEY,
    objectid TEXT,
    theme TEXT,
    feature_id INTEGER NOT NULL REFERENCES feature (id)
);
CREATE TABLE IF NOT EXISTS surface_data (
    id INTEGER PRIMARY KEY,
    objectid TEXT,
    is_front INTEGER NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    is_smooth INTEGER,
    tex_image_id INTEGER REFERENCES tex_image (id),
    tex_image_href TEXT
);
CREATE INDEX IF NOT EXISTS surface_data_objectid_idx ON surface_data (objectid);
CREATE TABLE IF NOT EXISTS appear_to_surface_data (
    id INTEGER PRIMARY KEY,
    appearance_id INTEGER NOT NULL REFERENCES appearance (id),
    surface_data_id INTEGER,
    surface_data_href TEXT
);
CREATE TABLE IF NOT EXISTS surface_data_mapping (
    surface_data_id INTEGER NOT NULL REFERENCES surface_data (id),
    geometry_data_id INTEGER NOT NULL REFERENCES geometry_data (id),
    surface TEXT NOT NULL,
    mapping TEXT NOT NULL,
    PRIMARY KEY (surface_data_id, geometry_data_id, surface)
);
CREATE TABLE IF NOT EXISTS property (
    id INTEGER PRIMARY KEY,
    feature_id INTEGER NOT NULL REFERENCES feature (id),
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    datatype TEXT,
    val_string TEXT,
    val_int INTEGER,
    val_double REAL,
    val_uom TEXT,
    val_lod INTEGER,
    val_relation INTEGER,
    val_feature_id INTEGER,
    val_geometry_id INTEGER,
    val_implicitgeom_id INTEGER,
    val_appearance_id INTEGER,
    val_address_id INTEGER,
    val_href TEXT,
    val_placement TEXT
);
CREATE INDEX IF NOT EXISTS property_feature_idx ON property (feature_id);
";

/// Namespaces registered in a fresh database.
pub(crate) const NAMESPACES: &[(&str, &str)] = &[
    ("core", "http://www.opengis.net/citygml/3.0"),
    ("app", "http://www.opengis.net/citygml/appearance/3.0"),
    ("bldg", "http://www.opengis.net/citygml/building/3.0"),
    ("brid", "http://www.opengis.net/citygml/bridge/3.0"),
    ("dem", "http://www.opengis.net/citygml/relief/3.0"),
    ("frn", "http://www.opengis.net/citygml/cityfurniture/3.0"),
    ("gen", "http://www.opengis.net/citygml/generics/3.0"),
    ("grp", "http://www.opengis.net/citygml/cityobjectgroup/3.0"),
    ("luse", "http://www.opengis.net/citygml/landuse/3.0"),
    ("tran", "http://www.opengis.net/citygml/transportation/3.0"),
    ("tun", "http://www.opengis.net/citygml/tunnel/3.0"),
    ("veg", "http://www.opengis.net/citygml/vegetation/3.0"),
    ("wtr", "http://www.opengis.net/citygml/waterbody/3.0"),
];

/// Object classes registered in a fresh database as `(id, alias, class)`.
pub(crate) const OBJECT_CLASSES: &[(i64, &str, &str)] = &[
    (1, "core", "CityObject"),
    (2, "core", "CityModel"),
    (3, "grp", "CityObjectGroup"),
    (10, "bldg", "Building"),
    (11, "bldg", "BuildingPart"),
    (12, "bldg", "BuildingInstallation"),
    (13, "bldg", "BuildingRoom"),
    (14, "bldg", "RoofSurface"),
    (15, "bldg", "WallSurface"),
    (16, "bldg", "GroundSurface"),
    (20, "brid", "Bridge"),
    (21, "brid", "BridgePart"),
    (30, "tun", "Tunnel"),
    (31, "tun", "TunnelPart"),
    (40, "tran", "Road"),
    (41, "tran", "Railway"),
    (50, "veg", "SolitaryVegetationObject"),
    (51, "veg", "PlantCover"),
    (60, "wtr", "WaterBody"),
    (70, "luse", "LandUse"),
    (80, "dem", "ReliefFeature"),
    (90, "frn", "CityFurniture"),
    (100, "gen", "GenericOccupiedSpace"),
];

/// Create every table and seed the metadata of a fresh database.
pub(crate) fn install(transaction: &Transaction<'_>, srid: i32) -> Result<(), SqliteAdapterError> {
    transaction
        .execute_batch(TABLES)
        .map_err(|source| SqliteAdapterError::CreateSchema { source })?;

    let already_installed: i64 = transaction
        .query_row("SELECT COUNT(*) FROM database_srs", [], |row| row.get(0))
        .map_err(|source| SqliteAdapterError::CreateSchema { source })?;
    if already_installed > 0 {
        return Ok(());
    }

    transaction
        .execute(
            "INSERT INTO database_srs (srid, srs_name) VALUES (?1, ?2)",
            (srid, format!("urn:ogc:def:crs:EPSG::{srid}")),
        )
        .map_err(|source| SqliteAdapterError::Seed {
            table: "database_srs",
            source,
        })?;
    seed(
        transaction,
        "INSERT OR IGNORE INTO sequences (name, value) VALUES (?1, 0)",
        "sequences",
        Sequence::ALL.iter().map(|sequence| (sequence.name(),)),
    )?;
    seed(
        transaction,
        "INSERT OR IGNORE INTO namespace (alias, uri) VALUES (?1, ?2)",
        "namespace",
        NAMESPACES.iter().copied(),
    )?;
    seed(
        transaction,
        "INSERT OR IGNORE INTO objectclass (id, namespace_alias, classname) VALUES (?1, ?2, ?3)",
        "objectclass",
        OBJECT_CLASSES.iter().copied(),
    )
}

fn seed<P: rusqlite::Params>(
    transaction: &Transaction<'_>,
    sql: &str,
    table: &'static str,
    rows: impl IntoIterator<Item = P>,
) -> Result<(), SqliteAdapterError> {
    let mut statement = transaction
        .prepare(sql)
        .map_err(|source| SqliteAdapterError::Seed { table, source })?;
    for row in rows {
        statement
            .execute(row)
            .map_err(|source| SqliteAdapterError::Seed { table, source })?;
    }
    Ok(())
}
