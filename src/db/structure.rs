// Structure Dump
// Reads SQL Server system catalogs and renders the schema as a GO-separated
// DDL script: tables first, then views, then stored procedures

use crate::db::traits::{DatabaseError, IdentifierQuoter, SqlExecutor, SqlRow};
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};

/// Batch separator understood by SQL Server tooling
pub const BATCH_SEPARATOR: &str = "GO";

/// Line ending written after every definition and separator
pub const LINE_ENDING: &str = "\r\n";

/// Schema whose tables are written without a qualifier
const DEFAULT_SCHEMA: &str = "dbo";

/// Tables SQL Server creates for its own bookkeeping
const HOUSEKEEPING_TABLES: &[&str] = &["dtproperties"];

/// Types that never take a length qualifier
const UNSIZED_TYPES: &[&str] = &["sql_variant", "text", "ntext", "image", "xml"];

/// CHARACTER_MAXIMUM_LENGTH reported for (MAX) columns
const UNBOUNDED_LENGTH: i64 = -1;

const PRIMARY_KEYS_QUERY: &str = r#"
    SELECT
        tc.TABLE_SCHEMA AS table_schema,
        tc.TABLE_NAME AS table_name,
        tc.CONSTRAINT_NAME AS constraint_name,
        kcu.COLUMN_NAME AS column_name
    FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
    JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
        ON kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
        AND kcu.TABLE_SCHEMA = tc.TABLE_SCHEMA
        AND kcu.TABLE_NAME = tc.TABLE_NAME
    WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
    ORDER BY tc.TABLE_SCHEMA, tc.TABLE_NAME, kcu.ORDINAL_POSITION
"#;

const VIEWS_QUERY: &str = r#"
    SELECT m.definition AS definition
    FROM sys.objects AS o
    JOIN sys.sql_modules AS m ON m.object_id = o.object_id
    WHERE o.type = 'V'
    ORDER BY o.object_id
"#;

const PROCEDURES_QUERY: &str = r#"
    SELECT OBJECT_DEFINITION(object_id) AS definition
    FROM sys.all_objects
    WHERE type = 'P' AND is_ms_shipped = 0
    ORDER BY object_id
"#;

fn columns_query(quoter: &dyn IdentifierQuoter) -> String {
    let excluded = HOUSEKEEPING_TABLES
        .iter()
        .map(|t| quoter.quote_string(t))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"
    SELECT
        c.TABLE_SCHEMA AS table_schema,
        c.TABLE_NAME AS table_name,
        c.COLUMN_NAME AS column_name,
        c.DATA_TYPE AS data_type,
        c.CHARACTER_MAXIMUM_LENGTH AS max_length,
        CAST(c.NUMERIC_PRECISION AS int) AS numeric_precision,
        c.NUMERIC_SCALE AS numeric_scale,
        c.IS_NULLABLE AS is_nullable,
        c.COLUMN_DEFAULT AS column_default,
        COLUMNPROPERTY(o.object_id, c.COLUMN_NAME, 'IsIdentity') AS is_identity,
        CAST(IDENT_SEED(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)) AS bigint) AS identity_seed,
        CAST(IDENT_INCR(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)) AS bigint) AS identity_increment
    FROM INFORMATION_SCHEMA.COLUMNS c
    JOIN sys.objects o
        ON o.object_id = OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME))
    WHERE o.type = 'U'
        AND o.name NOT IN ({})
    ORDER BY o.object_id, c.ORDINAL_POSITION
"#,
        excluded
    )
}

fn required(row: &SqlRow, column: &str) -> Result<String, DatabaseError> {
    row.get_str(column)
        .ok_or_else(|| DatabaseError::statement(format!("Catalog row is missing {}", column)))
}

fn schema_of(row: &SqlRow) -> String {
    row.get_str("table_schema")
        .unwrap_or_else(|| DEFAULT_SCHEMA.to_string())
}

/// One column as reported by INFORMATION_SCHEMA.COLUMNS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub max_length: Option<i64>,
    pub numeric_precision: Option<i64>,
    pub numeric_scale: Option<i64>,
    pub is_nullable: bool,
    pub default: Option<String>,
    /// (seed, increment)
    pub identity: Option<(i64, i64)>,
}

impl ColumnDefinition {
    pub fn from_row(row: &SqlRow) -> Result<Self, DatabaseError> {
        let is_identity = row.get_i64("is_identity").unwrap_or(0) == 1;
        let identity = is_identity.then(|| {
            (
                row.get_i64("identity_seed").unwrap_or(1),
                row.get_i64("identity_increment").unwrap_or(1),
            )
        });

        Ok(Self {
            schema: schema_of(row),
            table: required(row, "table_name")?,
            name: required(row, "column_name")?,
            data_type: required(row, "data_type")?,
            max_length: row.get_i64("max_length"),
            numeric_precision: row.get_i64("numeric_precision"),
            numeric_scale: row.get_i64("numeric_scale"),
            is_nullable: !row
                .get_str("is_nullable")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("NO")),
            default: row.get_str("column_default"),
            identity,
        })
    }

    /// Data type with its length, precision/scale or nothing
    pub fn type_clause(&self) -> String {
        let data_type = self.data_type.to_ascii_lowercase();

        if UNSIZED_TYPES.contains(&data_type.as_str()) {
            return self.data_type.clone();
        }

        if data_type == "decimal" || data_type == "numeric" {
            return match (self.numeric_precision, self.numeric_scale) {
                (Some(precision), Some(scale)) => format!("{}({}, {})", self.data_type, precision, scale),
                _ => self.data_type.clone(),
            };
        }

        match self.max_length {
            Some(UNBOUNDED_LENGTH) => format!("{}(MAX)", self.data_type),
            Some(length) => format!("{}({})", self.data_type, length),
            None => self.data_type.clone(),
        }
    }

    pub fn to_ddl(&self, quoter: &dyn IdentifierQuoter) -> String {
        let mut ddl = format!("{} {}", quoter.quote_identifier(&self.name), self.type_clause());

        if let Some((seed, increment)) = self.identity {
            ddl.push_str(&format!(" IDENTITY({},{})", seed, increment));
        }

        ddl.push_str(if self.is_nullable { " NULL" } else { " NOT NULL" });

        if let Some(default) = &self.default {
            ddl.push_str(" DEFAULT ");
            ddl.push_str(default);
        }

        ddl
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
    pub constraint: String,
    pub columns: Vec<String>,
}

/// A user table with its columns in ordinal order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Option<PrimaryKey>,
}

impl TableDefinition {
    /// `[name]` for the default schema, `[schema].[name]` otherwise
    pub fn qualified_name(&self, quoter: &dyn IdentifierQuoter) -> String {
        if self.schema.eq_ignore_ascii_case(DEFAULT_SCHEMA) {
            quoter.quote_identifier(&self.name)
        } else {
            format!("{}.{}", quoter.quote_identifier(&self.schema), quoter.quote_identifier(&self.name))
        }
    }

    fn is(&self, schema: &str, name: &str) -> bool {
        self.schema == schema && self.name == name
    }

    /// CREATE TABLE, followed on the same line by the primary key constraint
    pub fn to_ddl(&self, quoter: &dyn IdentifierQuoter) -> String {
        let table = self.qualified_name(quoter);
        let columns = self
            .columns
            .iter()
            .map(|c| c.to_ddl(quoter))
            .collect::<Vec<_>>()
            .join(", ");

        let mut ddl = format!("CREATE TABLE {} ({})", table, columns);

        if let Some(pk) = &self.primary_key {
            let key_columns = pk
                .columns
                .iter()
                .map(|c| quoter.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ");
            ddl.push_str(&format!(
                " ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
                table,
                quoter.quote_identifier(&pk.constraint),
                key_columns
            ));
        }

        ddl
    }
}

/// Group catalog rows into tables by schema and name, keeping the order
/// tables first appear in
pub fn build_tables(column_rows: &[SqlRow], key_rows: &[SqlRow]) -> Result<Vec<TableDefinition>, DatabaseError> {
    let mut tables: Vec<TableDefinition> = Vec::new();

    for row in column_rows {
        let column = ColumnDefinition::from_row(row)?;
        match tables.iter_mut().find(|t| t.is(&column.schema, &column.table)) {
            Some(table) => table.columns.push(column),
            None => tables.push(TableDefinition {
                schema: column.schema.clone(),
                name: column.table.clone(),
                columns: vec![column],
                primary_key: None,
            }),
        }
    }

    for row in key_rows {
        let schema = schema_of(row);
        let table_name = required(row, "table_name")?;
        let constraint = required(row, "constraint_name")?;
        let column = required(row, "column_name")?;

        let Some(table) = tables.iter_mut().find(|t| t.is(&schema, &table_name)) else {
            continue;
        };
        table
            .primary_key
            .get_or_insert_with(|| PrimaryKey {
                constraint,
                columns: Vec::new(),
            })
            .columns
            .push(column);
    }

    Ok(tables)
}

/// Ordered DDL blocks, each replayable as its own batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpDocument {
    pub tables: Vec<String>,
    pub views: Vec<String>,
    pub procedures: Vec<String>,
}

impl DumpDocument {
    /// Definitions in replay order
    pub fn blocks(&self) -> impl Iterator<Item = &String> {
        self.tables.iter().chain(&self.views).chain(&self.procedures)
    }

    pub fn len(&self) -> usize {
        self.tables.len() + self.views.len() + self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn render(&self) -> String {
        self.blocks().map(|b| format_block(b)).collect()
    }
}

/// A definition followed by the separator on its own line
pub fn format_block(definition: &str) -> String {
    format!("{}{}{}{}", definition, LINE_ENDING, BATCH_SEPARATOR, LINE_ENDING)
}

/// Generates DDL from the database a handle is bound to
pub struct StructureDumper<'a> {
    conn: &'a mut dyn SqlExecutor,
    quoter: &'a dyn IdentifierQuoter,
}

impl<'a> StructureDumper<'a> {
    pub fn new(conn: &'a mut dyn SqlExecutor, quoter: &'a dyn IdentifierQuoter) -> Self {
        Self { conn, quoter }
    }

    pub async fn table_definitions(&mut self) -> Result<Vec<String>, DatabaseError> {
        let column_rows = self.conn.select_all(&columns_query(self.quoter)).await?;
        let key_rows = self.conn.select_all(PRIMARY_KEYS_QUERY).await?;

        Ok(build_tables(&column_rows, &key_rows)?
            .iter()
            .map(|t| t.to_ddl(self.quoter))
            .collect())
    }

    pub async fn view_definitions(&mut self) -> Result<Vec<String>, DatabaseError> {
        self.definitions(VIEWS_QUERY).await
    }

    pub async fn procedure_definitions(&mut self) -> Result<Vec<String>, DatabaseError> {
        self.definitions(PROCEDURES_QUERY).await
    }

    async fn definitions(&mut self, sql: &str) -> Result<Vec<String>, DatabaseError> {
        let rows = self.conn.select_all(sql).await?;
        Ok(rows.iter().filter_map(|row| row.get_str("definition")).collect())
    }

    /// Collect the whole document in memory
    pub async fn dump(&mut self) -> Result<DumpDocument, DatabaseError> {
        Ok(DumpDocument {
            tables: self.table_definitions().await?,
            views: self.view_definitions().await?,
            procedures: self.procedure_definitions().await?,
        })
    }

    /// Write the document to `path`, section by section.
    /// A failing catalog query leaves the sections written so far on disk.
    pub async fn dump_to_file(&mut self, path: &Path) -> Result<DumpDocument, DatabaseError> {
        let file = tokio::fs::File::create(path).await?;
        let mut writer = BufWriter::new(file);
        let mut document = DumpDocument::default();

        document.tables = self.table_definitions().await?;
        write_blocks(&mut writer, &document.tables).await?;

        document.views = self.view_definitions().await?;
        write_blocks(&mut writer, &document.views).await?;

        document.procedures = self.procedure_definitions().await?;
        write_blocks(&mut writer, &document.procedures).await?;

        writer.shutdown().await?;
        tracing::info!(
            path = %path.display(),
            tables = document.tables.len(),
            views = document.views.len(),
            procedures = document.procedures.len(),
            "structure dumped"
        );
        Ok(document)
    }
}

async fn write_blocks(writer: &mut BufWriter<tokio::fs::File>, blocks: &[String]) -> Result<(), DatabaseError> {
    for block in blocks {
        writer.write_all(format_block(block).as_bytes()).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::drivers::MssqlDialect;
    use crate::db::testing::{RecordingExecutor, Scripted};
    use crate::db::traits::CellValue;

    fn text(s: &str) -> CellValue {
        CellValue::String(s.to_string())
    }

    fn column_row(
        table: &str,
        column: &str,
        data_type: &str,
        max_length: CellValue,
        nullable: &str,
        default: CellValue,
        identity: bool,
    ) -> SqlRow {
        let names = [
            "table_name",
            "column_name",
            "data_type",
            "max_length",
            "numeric_precision",
            "numeric_scale",
            "is_nullable",
            "column_default",
            "is_identity",
            "identity_seed",
            "identity_increment",
        ];
        let (seed, incr) = if identity {
            (CellValue::Int(1), CellValue::Int(1))
        } else {
            (CellValue::Null, CellValue::Null)
        };
        SqlRow::new(
            names.iter().map(|n| n.to_string()).collect(),
            vec![
                text(table),
                text(column),
                text(data_type),
                max_length,
                CellValue::Null,
                CellValue::Null,
                text(nullable),
                default,
                CellValue::Int(i64::from(identity)),
                seed,
                incr,
            ],
        )
    }

    fn key_row(table: &str, constraint: &str, column: &str) -> SqlRow {
        SqlRow::new(
            vec![
                "table_name".to_string(),
                "constraint_name".to_string(),
                "column_name".to_string(),
            ],
            vec![text(table), text(constraint), text(column)],
        )
    }

    fn definition_row(definition: &str) -> SqlRow {
        SqlRow::new(vec!["definition".to_string()], vec![text(definition)])
    }

    fn column(data_type: &str) -> ColumnDefinition {
        ColumnDefinition {
            schema: "dbo".to_string(),
            table: "t".to_string(),
            name: "c".to_string(),
            data_type: data_type.to_string(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            is_nullable: true,
            default: None,
            identity: None,
        }
    }

    #[test]
    fn test_type_clause() {
        let mut c = column("nvarchar");
        c.max_length = Some(50);
        assert_eq!(c.type_clause(), "nvarchar(50)");

        c.max_length = Some(-1);
        assert_eq!(c.type_clause(), "nvarchar(MAX)");

        let mut c = column("ntext");
        c.max_length = Some(1073741823);
        assert_eq!(c.type_clause(), "ntext");

        let mut c = column("decimal");
        c.numeric_precision = Some(18);
        c.numeric_scale = Some(2);
        assert_eq!(c.type_clause(), "decimal(18, 2)");

        assert_eq!(column("int").type_clause(), "int");
        assert_eq!(column("sql_variant").type_clause(), "sql_variant");
    }

    #[test]
    fn test_column_ddl() {
        let mut c = column("int");
        c.name = "id".to_string();
        c.identity = Some((100, 5));
        c.is_nullable = false;
        assert_eq!(c.to_ddl(&MssqlDialect), "[id] int IDENTITY(100,5) NOT NULL");

        let mut c = column("varchar");
        c.name = "status".to_string();
        c.max_length = Some(20);
        c.default = Some("('new')".to_string());
        assert_eq!(c.to_ddl(&MssqlDialect), "[status] varchar(20) NULL DEFAULT ('new')");
    }

    #[test]
    fn test_build_tables_groups_by_table_in_order() {
        let columns = vec![
            column_row("users", "id", "int", CellValue::Null, "NO", CellValue::Null, true),
            column_row("users", "name", "nvarchar", CellValue::Int(100), "YES", CellValue::Null, false),
            column_row("audit", "note", "nvarchar", CellValue::Int(-1), "YES", CellValue::Null, false),
        ];
        let keys = vec![key_row("users", "PK_users", "id")];

        let tables = build_tables(&columns, &keys).unwrap();

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "users");
        assert_eq!(tables[0].columns.len(), 2);
        assert_eq!(
            tables[0].primary_key,
            Some(PrimaryKey {
                constraint: "PK_users".to_string(),
                columns: vec!["id".to_string()],
            })
        );
        assert_eq!(tables[1].name, "audit");
        assert!(tables[1].primary_key.is_none());
    }

    #[test]
    fn test_composite_primary_key() {
        let columns = vec![
            column_row("memberships", "user_id", "int", CellValue::Null, "NO", CellValue::Null, false),
            column_row("memberships", "group_id", "int", CellValue::Null, "NO", CellValue::Null, false),
        ];
        let keys = vec![
            key_row("memberships", "PK_memberships", "user_id"),
            key_row("memberships", "PK_memberships", "group_id"),
        ];

        let tables = build_tables(&columns, &keys).unwrap();
        assert_eq!(
            tables[0].to_ddl(&MssqlDialect),
            "CREATE TABLE [memberships] ([user_id] int NOT NULL, [group_id] int NOT NULL) \
             ALTER TABLE [memberships] ADD CONSTRAINT [PK_memberships] PRIMARY KEY ([user_id], [group_id])"
        );
    }

    #[test]
    fn test_same_table_name_in_two_schemas() {
        let schema_row = |schema: &str, table: &str, column: &str| {
            let mut row = column_row(table, column, "int", CellValue::Null, "NO", CellValue::Null, false);
            row.columns.push("table_schema".to_string());
            row.values.push(text(schema));
            row
        };
        let columns = vec![
            schema_row("dbo", "users", "id"),
            schema_row("audit", "users", "changed_by"),
            schema_row("dbo", "users", "age"),
        ];
        let mut key = key_row("users", "PK_audit_users", "changed_by");
        key.columns.push("table_schema".to_string());
        key.values.push(text("audit"));

        let tables = build_tables(&columns, &[key]).unwrap();

        assert_eq!(tables.len(), 2);
        assert_eq!(
            tables[0].to_ddl(&MssqlDialect),
            "CREATE TABLE [users] ([id] int NOT NULL, [age] int NOT NULL)"
        );
        assert_eq!(
            tables[1].to_ddl(&MssqlDialect),
            "CREATE TABLE [audit].[users] ([changed_by] int NOT NULL) \
             ALTER TABLE [audit].[users] ADD CONSTRAINT [PK_audit_users] PRIMARY KEY ([changed_by])"
        );
    }

    #[test]
    fn test_render_separates_blocks() {
        let document = DumpDocument {
            tables: vec!["CREATE TABLE [a] ([x] int NULL)".to_string()],
            views: vec!["CREATE VIEW v AS SELECT x FROM a".to_string()],
            procedures: vec![],
        };

        assert_eq!(
            document.render(),
            "CREATE TABLE [a] ([x] int NULL)\r\nGO\r\nCREATE VIEW v AS SELECT x FROM a\r\nGO\r\n"
        );
        assert_eq!(document.len(), 2);
    }

    #[tokio::test]
    async fn test_dump_orders_tables_views_procedures() {
        let mut conn = RecordingExecutor::new("app");
        conn.respond_rows(
            "INFORMATION_SCHEMA.COLUMNS",
            vec![
                column_row("widgets", "id", "int", CellValue::Null, "NO", CellValue::Null, true),
                column_row("widgets", "label", "nvarchar", CellValue::Int(40), "YES", text("(N'unnamed')"), false),
            ],
        );
        conn.respond_rows("CONSTRAINT_TYPE = 'PRIMARY KEY'", vec![key_row("widgets", "PK_widgets", "id")]);
        conn.respond_rows("sys.sql_modules", vec![definition_row("CREATE VIEW named_widgets AS SELECT label FROM widgets")]);
        conn.respond_rows("sys.all_objects", vec![definition_row("CREATE PROCEDURE purge_widgets AS DELETE FROM widgets")]);

        let document = StructureDumper::new(&mut conn, &MssqlDialect).dump().await.unwrap();

        assert_eq!(
            document.tables,
            vec![
                "CREATE TABLE [widgets] ([id] int IDENTITY(1,1) NOT NULL, [label] nvarchar(40) NULL DEFAULT (N'unnamed')) \
                 ALTER TABLE [widgets] ADD CONSTRAINT [PK_widgets] PRIMARY KEY ([id])"
            ]
        );
        assert_eq!(document.views.len(), 1);
        assert_eq!(document.procedures, vec!["CREATE PROCEDURE purge_widgets AS DELETE FROM widgets"]);

        let statements = conn.statements();
        assert!(statements[0].contains("NOT IN ('dtproperties')"));
    }

    #[tokio::test]
    async fn test_dump_to_file_writes_crlf_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("structure.sql");

        let mut conn = RecordingExecutor::new("app");
        conn.respond_rows(
            "INFORMATION_SCHEMA.COLUMNS",
            vec![column_row("t", "x", "int", CellValue::Null, "YES", CellValue::Null, false)],
        );
        conn.respond_rows("sys.sql_modules", vec![definition_row("CREATE VIEW v AS SELECT x FROM t")]);

        StructureDumper::new(&mut conn, &MssqlDialect)
            .dump_to_file(&path)
            .await
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "CREATE TABLE [t] ([x] int NULL)\r\nGO\r\nCREATE VIEW v AS SELECT x FROM t\r\nGO\r\n"
        );
    }

    #[tokio::test]
    async fn test_failed_introspection_leaves_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("structure.sql");

        let mut conn = RecordingExecutor::new("app");
        conn.respond_rows(
            "INFORMATION_SCHEMA.COLUMNS",
            vec![column_row("t", "x", "int", CellValue::Null, "YES", CellValue::Null, false)],
        );
        conn.fail_on("sys.sql_modules", "The SELECT permission was denied on the object 'sql_modules'");

        let err = StructureDumper::new(&mut conn, &MssqlDialect)
            .dump_to_file(&path)
            .await
            .unwrap_err();

        assert!(matches!(err, DatabaseError::Statement { .. }));
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "CREATE TABLE [t] ([x] int NULL)\r\nGO\r\n");
    }
}
