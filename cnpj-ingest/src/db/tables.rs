//! Table definitions shared between bootstrap and the streaming loader
//!
//! Single source of truth for DDL. The final `estabelecimentos` column list
//! is shared because the consolidation step recreates the table from scratch
//! while bootstrap only guarantees it exists for readers.

/// Column list of the denormalised super-table: the 32 establishment columns
/// followed by 6 columns absorbed from empresas and 6 from simples.
pub const ESTABELECIMENTOS_COLUMNS: &str = r#"
    cnpj14 VARCHAR(14) PRIMARY KEY,
    cnpj_basico VARCHAR(8),
    cnpj_ordem VARCHAR(4),
    cnpj_dv VARCHAR(2),
    matriz_filial VARCHAR(1),
    nome_fantasia TEXT,
    situacao_cadastral VARCHAR(2),
    data_situacao_cadastral VARCHAR(8),
    motivo_situacao_cadastral VARCHAR(2),
    nome_cidade_exterior TEXT,
    codigo_pais VARCHAR(3),
    pais TEXT,
    data_inicio_atividade VARCHAR(8),
    cnae_fiscal_principal VARCHAR(7),
    cnae_fiscal_secundaria TEXT,
    tipo_logradouro TEXT,
    logradouro TEXT,
    numero TEXT,
    complemento TEXT,
    bairro TEXT,
    cep VARCHAR(8),
    uf VARCHAR(2),
    municipio TEXT,
    ddd1 VARCHAR(4),
    telefone1 VARCHAR(20),
    ddd2 VARCHAR(4),
    telefone2 VARCHAR(20),
    ddd_fax VARCHAR(4),
    fax VARCHAR(20),
    email TEXT,
    situacao_especial TEXT,
    data_situacao_especial VARCHAR(8),
    razao_social TEXT,
    natureza_juridica VARCHAR(4),
    qualificacao_responsavel VARCHAR(2),
    capital_social DECIMAL(20,2),
    porte_empresa VARCHAR(2),
    ente_federativo TEXT,
    opcao_simples VARCHAR(1),
    data_opcao_simples VARCHAR(8),
    data_exclusao_simples VARCHAR(8),
    opcao_mei VARCHAR(1),
    data_opcao_mei VARCHAR(8),
    data_exclusao_mei VARCHAR(8)
"#;

pub fn create_estabelecimentos_sql(if_not_exists: bool) -> String {
    let guard = if if_not_exists { "IF NOT EXISTS " } else { "" };
    format!("CREATE TABLE {guard}estabelecimentos ({ESTABELECIMENTOS_COLUMNS})")
}

pub const CREATE_SOCIOS: &str = r#"
    CREATE TABLE IF NOT EXISTS socios (
        id SERIAL PRIMARY KEY,
        cnpj_basico VARCHAR(8),
        identificador_socio VARCHAR(1),
        nome_socio TEXT,
        cnpj_cpf_socio TEXT,
        codigo_qualificacao_socio VARCHAR(2),
        percentual_capital_social VARCHAR(6),
        data_entrada_sociedade VARCHAR(8),
        codigo_pais VARCHAR(3),
        cpf_representante_legal VARCHAR(11),
        nome_representante_legal TEXT,
        codigo_qualificacao_representante VARCHAR(2),
        faixa_etaria VARCHAR(2)
    )
"#;

pub const CREATE_DATA_VERSIONS: &str = r#"
    CREATE TABLE IF NOT EXISTS data_versions (
        id SERIAL PRIMARY KEY,
        release VARCHAR(7) UNIQUE NOT NULL,
        status VARCHAR(16) NOT NULL DEFAULT 'pending',
        started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        finished_at TIMESTAMPTZ,
        note VARCHAR(255)
    )
"#;

pub const CREATE_STAGING_EMPRESAS: &str = r#"
    CREATE TABLE IF NOT EXISTS staging_empresas (
        cnpj_basico VARCHAR(8) PRIMARY KEY,
        razao_social VARCHAR(255),
        natureza_juridica VARCHAR(4),
        qualificacao_responsavel VARCHAR(2),
        capital_social DECIMAL(20,2),
        porte_empresa VARCHAR(2),
        ente_federativo VARCHAR(100)
    )
"#;

pub const CREATE_STAGING_SIMPLES: &str = r#"
    CREATE TABLE IF NOT EXISTS staging_simples (
        cnpj_basico VARCHAR(8) PRIMARY KEY,
        opcao_simples VARCHAR(1),
        data_opcao_simples VARCHAR(8),
        data_exclusao_simples VARCHAR(8),
        opcao_mei VARCHAR(1),
        data_opcao_mei VARCHAR(8),
        data_exclusao_mei VARCHAR(8)
    )
"#;

pub const CREATE_STAGING_ESTABELECIMENTOS: &str = r#"
    CREATE TABLE IF NOT EXISTS staging_estabelecimentos (
        cnpj14 VARCHAR(14) PRIMARY KEY,
        cnpj_basico VARCHAR(8),
        cnpj_ordem VARCHAR(4),
        cnpj_dv VARCHAR(2),
        matriz_filial VARCHAR(1),
        nome_fantasia TEXT,
        situacao_cadastral VARCHAR(2),
        data_situacao_cadastral VARCHAR(8),
        motivo_situacao_cadastral VARCHAR(2),
        nome_cidade_exterior TEXT,
        codigo_pais VARCHAR(3),
        pais TEXT,
        data_inicio_atividade VARCHAR(8),
        cnae_fiscal_principal VARCHAR(7),
        cnae_fiscal_secundaria TEXT,
        tipo_logradouro TEXT,
        logradouro TEXT,
        numero TEXT,
        complemento TEXT,
        bairro TEXT,
        cep VARCHAR(8),
        uf VARCHAR(2),
        municipio TEXT,
        ddd1 VARCHAR(4),
        telefone1 VARCHAR(20),
        ddd2 VARCHAR(4),
        telefone2 VARCHAR(20),
        ddd_fax VARCHAR(4),
        fax VARCHAR(20),
        email TEXT,
        situacao_especial TEXT,
        data_situacao_especial VARCHAR(8)
    )
"#;

pub const CREATE_IMPORT_CHECKPOINTS: &str = r#"
    CREATE TABLE IF NOT EXISTS import_checkpoints (
        release VARCHAR(7) PRIMARY KEY,
        fase1_empresas BOOLEAN NOT NULL DEFAULT FALSE,
        fase2_simples BOOLEAN NOT NULL DEFAULT FALSE,
        fase3_estabelecimentos BOOLEAN NOT NULL DEFAULT FALSE,
        fase4_socios BOOLEAN NOT NULL DEFAULT FALSE,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
"#;

pub const CREATE_IMPORT_FILES_PROCESSED: &str = r#"
    CREATE TABLE IF NOT EXISTS import_files_processed (
        id SERIAL PRIMARY KEY,
        release VARCHAR(7) NOT NULL,
        fase VARCHAR(50) NOT NULL,
        filename VARCHAR(255) NOT NULL,
        rows_imported BIGINT NOT NULL DEFAULT 0,
        processed_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (release, fase, filename)
    )
"#;

/// Indexes created by Phase 3 Part 3, each in its own transaction.
pub const ESTABELECIMENTOS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_estabelecimentos_cnpj_basico ON estabelecimentos (cnpj_basico)",
    "CREATE INDEX IF NOT EXISTS idx_estabelecimentos_uf ON estabelecimentos (uf)",
    "CREATE INDEX IF NOT EXISTS idx_estabelecimentos_municipio ON estabelecimentos (municipio)",
    "CREATE INDEX IF NOT EXISTS idx_estabelecimentos_cnae ON estabelecimentos (cnae_fiscal_principal)",
    "CREATE INDEX IF NOT EXISTS idx_estabelecimentos_nome_trgm ON estabelecimentos USING GIN (nome_fantasia gin_trgm_ops)",
    "CREATE INDEX IF NOT EXISTS idx_estabelecimentos_razao_trgm ON estabelecimentos USING GIN (razao_social gin_trgm_ops)",
    "CREATE INDEX IF NOT EXISTS idx_estabelecimentos_natureza ON estabelecimentos (natureza_juridica)",
    "CREATE INDEX IF NOT EXISTS idx_estabelecimentos_porte ON estabelecimentos (porte_empresa)",
    "CREATE INDEX IF NOT EXISTS idx_estabelecimentos_opcao_simples ON estabelecimentos (opcao_simples)",
    "CREATE INDEX IF NOT EXISTS idx_estabelecimentos_opcao_mei ON estabelecimentos (opcao_mei)",
];

/// Indexes created after Phase 4.
pub const SOCIOS_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_socios_cnpj_basico ON socios (cnpj_basico)",
    "CREATE INDEX IF NOT EXISTS idx_socios_nome_trgm ON socios USING GIN (nome_socio gin_trgm_ops)",
    "CREATE INDEX IF NOT EXISTS idx_socios_cpf_trgm ON socios USING GIN (cnpj_cpf_socio gin_trgm_ops)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn super_table_carries_staging_plus_denormalised_columns() {
        let columns: Vec<&str> = ESTABELECIMENTOS_COLUMNS
            .lines()
            .filter_map(|l| l.trim().split_whitespace().next())
            .filter(|c| !c.is_empty())
            .collect();
        assert_eq!(columns.len(), 44);
        assert_eq!(columns[0], "cnpj14");
        assert!(columns.contains(&"razao_social"));
        assert!(columns.contains(&"opcao_mei"));
    }

    #[test]
    fn create_sql_variants_differ_only_in_guard() {
        let fresh = create_estabelecimentos_sql(false);
        let guarded = create_estabelecimentos_sql(true);
        assert!(fresh.starts_with("CREATE TABLE estabelecimentos"));
        assert!(guarded.starts_with("CREATE TABLE IF NOT EXISTS estabelecimentos"));
    }
}
