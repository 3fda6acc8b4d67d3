#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::path::Path;

use faena_lib::import::ImportMode;
use faena_lib::AppState;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub const FIXTURE_DDL: &str = r#"
CREATE TABLE proyectos (
    id_proyecto INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre TEXT NOT NULL,
    fecha_inicio DATETIME,
    activo BOOLEAN NOT NULL DEFAULT 1
);
CREATE TABLE empleados (
    id_empleado INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre TEXT NOT NULL,
    apellido TEXT,
    salario_base REAL
);
CREATE TABLE proveedores (
    id_proveedor INTEGER PRIMARY KEY AUTOINCREMENT,
    nombre TEXT NOT NULL,
    contacto TEXT
);
CREATE TABLE nominas (
    id_nomina INTEGER PRIMARY KEY AUTOINCREMENT,
    id_proyecto INTEGER NOT NULL REFERENCES proyectos(id_proyecto),
    periodo TEXT NOT NULL,
    cerrada BOOLEAN NOT NULL DEFAULT 0
);
CREATE TABLE pagos_nomina (
    id_pago INTEGER PRIMARY KEY AUTOINCREMENT,
    id_proyecto INTEGER NOT NULL REFERENCES proyectos(id_proyecto),
    id_nomina INTEGER NOT NULL REFERENCES nominas(id_nomina),
    id_empleado INTEGER NOT NULL REFERENCES empleados(id_empleado),
    monto REAL NOT NULL,
    pagado_en DATETIME
);
CREATE TABLE herramientas (
    id_herramienta INTEGER PRIMARY KEY AUTOINCREMENT,
    id_proyecto INTEGER NOT NULL REFERENCES proyectos(id_proyecto),
    nombre TEXT NOT NULL,
    estado TEXT,
    especificaciones JSON,
    foto BLOB
);
CREATE TABLE movimientos_herramienta (
    id_movimiento INTEGER PRIMARY KEY AUTOINCREMENT,
    id_proyecto INTEGER NOT NULL REFERENCES proyectos(id_proyecto),
    id_herramienta INTEGER NOT NULL REFERENCES herramientas(id_herramienta),
    id_empleado INTEGER REFERENCES empleados(id_empleado),
    tipo TEXT NOT NULL,
    fecha DATETIME
);
CREATE TABLE suministros (
    id_suministro INTEGER PRIMARY KEY AUTOINCREMENT,
    id_proyecto INTEGER NOT NULL REFERENCES proyectos(id_proyecto),
    id_proveedor INTEGER REFERENCES proveedores(id_proveedor),
    descripcion TEXT NOT NULL,
    cantidad REAL,
    unidad TEXT
);
CREATE TABLE presupuestos (
    id_presupuesto INTEGER PRIMARY KEY AUTOINCREMENT,
    id_proyecto INTEGER NOT NULL REFERENCES proyectos(id_proyecto),
    descripcion TEXT NOT NULL,
    total REAL
);
CREATE TABLE partidas_presupuesto (
    id_partida INTEGER PRIMARY KEY AUTOINCREMENT,
    id_proyecto INTEGER NOT NULL REFERENCES proyectos(id_proyecto),
    id_presupuesto INTEGER NOT NULL REFERENCES presupuestos(id_presupuesto),
    id_proveedor INTEGER REFERENCES proveedores(id_proveedor),
    concepto TEXT NOT NULL,
    importe REAL
);
CREATE VIEW resumen_nomina AS
    SELECT n.id_proyecto, n.periodo, COUNT(p.id_pago) AS pagos, COALESCE(SUM(p.monto), 0) AS total
    FROM nominas n LEFT JOIN pagos_nomina p ON p.id_nomina = n.id_nomina
    GROUP BY n.id_nomina;
CREATE TRIGGER herramientas_estado_default AFTER INSERT ON herramientas
    WHEN NEW.estado IS NULL
BEGIN
    UPDATE herramientas SET estado = 'disponible' WHERE id_herramienta = NEW.id_herramienta;
END;
"#;

/// Project 1 ("Flex Park") owns 11 scoped rows, 3 of them in pagos_nomina.
/// Project 2 owns one row in every scoped table except movimientos_herramienta.
pub const FIXTURE_ROWS: &str = r#"
INSERT INTO proyectos (id_proyecto, nombre, fecha_inicio, activo) VALUES
    (1, 'Flex Park', '2024-01-15 08:00:00', 1),
    (2, 'Torre Norte', NULL, 1);
INSERT INTO empleados (id_empleado, nombre, apellido, salario_base) VALUES
    (1, 'Ana', 'Pérez', 1200.5),
    (2, 'Luis', 'Gómez', 980);
INSERT INTO proveedores (id_proveedor, nombre, contacto) VALUES
    (1, 'Cementos del Sur', 'ventas@cds.example');
INSERT INTO nominas (id_nomina, id_proyecto, periodo, cerrada) VALUES
    (1, 1, '2024-01', 1),
    (2, 1, '2024-02', 0),
    (3, 2, '2024-01', 0);
INSERT INTO pagos_nomina (id_pago, id_proyecto, id_nomina, id_empleado, monto, pagado_en) VALUES
    (1, 1, 1, 1, 600.25, '2024-01-31 17:00:00'),
    (2, 1, 1, 2, 490, '2024-01-31 17:00:00'),
    (3, 1, 2, 1, 600.25, NULL),
    (4, 2, 3, 2, 500, NULL);
INSERT INTO herramientas (id_herramienta, id_proyecto, nombre, estado, especificaciones, foto) VALUES
    (1, 1, 'Taladro', NULL, '{"voltaje":18}', X'0102'),
    (2, 2, 'Andamio', 'en uso', NULL, NULL);
INSERT INTO movimientos_herramienta (id_movimiento, id_proyecto, id_herramienta, id_empleado, tipo, fecha) VALUES
    (1, 1, 1, 1, 'salida', '2024-01-20 09:30:00');
INSERT INTO suministros (id_suministro, id_proyecto, id_proveedor, descripcion, cantidad, unidad) VALUES
    (1, 1, 1, 'Cemento gris', 50, 'saco'),
    (2, 2, 1, 'Arena', 3, 'm3');
INSERT INTO presupuestos (id_presupuesto, id_proyecto, descripcion, total) VALUES
    (1, 1, 'Obra gris', 150000),
    (2, 2, 'Cimentación', 80000);
INSERT INTO partidas_presupuesto (id_partida, id_proyecto, id_presupuesto, id_proveedor, concepto, importe) VALUES
    (1, 1, 1, 1, 'Concreto', 60000),
    (2, 2, 2, 1, 'Acero', 30000);
"#;

pub const PROJECT_ONE_ROWS: i64 = 11;

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    pool
}

pub async fn apply_fixture(pool: &SqlitePool) {
    sqlx::raw_sql(FIXTURE_DDL)
        .execute(pool)
        .await
        .expect("fixture schema");
    sqlx::raw_sql(FIXTURE_ROWS)
        .execute(pool)
        .await
        .expect("fixture rows");
}

pub async fn seeded_pool() -> SqlitePool {
    let pool = temp_pool().await;
    apply_fixture(&pool).await;
    pool
}

pub async fn seeded_state() -> AppState {
    AppState::new(seeded_pool().await, ImportMode::BestEffort)
        .await
        .expect("app state")
}

/// Creates a file database holding the fixture, for tests that go through the
/// binary.
pub async fn seeded_file(path: &Path) {
    let pool = faena_lib::db::open_pool(path, 1).await.expect("open file db");
    apply_fixture(&pool).await;
    pool.close().await;
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{table}\""))
        .fetch_one(pool)
        .await
        .expect("count")
}

pub async fn count_where(pool: &SqlitePool, table: &str, project_id: i64) -> i64 {
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM \"{table}\" WHERE id_proyecto = ?1"
    ))
    .bind(project_id)
    .fetch_one(pool)
    .await
    .expect("count where")
}

pub async fn foreign_keys_enabled(pool: &SqlitePool) -> bool {
    let (fks,): (i64,) = sqlx::query_as("PRAGMA foreign_keys;")
        .fetch_one(pool)
        .await
        .expect("pragma");
    fks == 1
}
