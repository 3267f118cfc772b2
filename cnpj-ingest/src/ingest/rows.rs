//! Typed row builders
//!
//! Upstream CSV rows are positional, `latin-1` encoded, frequently shorter
//! than their nominal width, and carry integer codes serialised as floats
//! (`"16.0"`). Each dataset gets a fixed struct whose builder takes the
//! decoded positional fields, pads, truncates and normalises them; the
//! struct then serialises itself as one COPY TEXT line (tab-separated,
//! `\`/tab/newline/CR escaped).
//!
//! NUL bytes are stripped once, at field decode time - they are invalid in
//! PostgreSQL text whatever the column type.

use encoding_rs::mem::decode_latin1;

/// Registration status whose establishments are dropped at load time.
pub const SITUACAO_CANCELADA: &str = "08";

/// Decode one raw CSV record into owned UTF-8 fields, stripping NULs.
pub fn decode_record(record: &csv::ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|raw| {
            let decoded = decode_latin1(raw);
            if decoded.contains('\0') {
                decoded.replace('\0', "")
            } else {
                decoded.into_owned()
            }
        })
        .collect()
}

/// Append `value` to a COPY TEXT buffer, escaping the format's metacharacters.
pub fn push_escaped(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => {}
            c => out.push(c),
        }
    }
}

fn field<'a>(fields: &'a [String], idx: usize) -> &'a str {
    fields.get(idx).map(String::as_str).unwrap_or("")
}

/// Truncate on a character boundary (VARCHAR widths count characters).
fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Keep only digits, then left-zero-pad to `width`. Longer values are kept
/// as-is rather than truncated, mirroring upstream zero-fill semantics.
fn digits_padded(raw: &str, width: usize) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() >= width {
        digits
    } else {
        let mut padded = String::with_capacity(width);
        for _ in 0..(width - digits.len()) {
            padded.push('0');
        }
        padded.push_str(&digits);
        padded
    }
}

/// Left-zero-pad without touching the content. Partner documents arrive
/// masked (`***456789**`); the mask characters are part of the value.
fn zero_fill(raw: &str, width: usize) -> String {
    let trimmed = raw.trim();
    if trimmed.chars().count() >= width {
        trimmed.to_string()
    } else {
        let mut padded = String::with_capacity(width);
        for _ in 0..(width - trimmed.chars().count()) {
            padded.push('0');
        }
        padded.push_str(trimmed);
        padded
    }
}

/// Integer part of a code that upstream may serialise as a float (`"16.0"`).
fn integer_part(raw: &str) -> &str {
    raw.trim().split('.').next().unwrap_or("")
}

/// Two-character code field with the float suffix stripped.
fn code2(raw: &str) -> String {
    truncate_chars(integer_part(raw), 2).to_string()
}

/// Share capital: `,` decimal separator, absent or malformed becomes 0.
fn parse_capital(raw: &str) -> f64 {
    let normalised = raw.trim().replace(',', ".");
    if normalised.is_empty() {
        return 0.0;
    }
    normalised.parse().unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// empresas (7 fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct EmpresaRow {
    pub cnpj_basico: String,
    pub razao_social: String,
    pub natureza_juridica: String,
    pub qualificacao_responsavel: String,
    pub capital_social: f64,
    pub porte_empresa: String,
    pub ente_federativo: String,
}

impl EmpresaRow {
    pub const MIN_FIELDS: usize = 7;

    pub fn from_fields(fields: &[String]) -> Option<Self> {
        if fields.len() < Self::MIN_FIELDS {
            return None;
        }
        Some(Self {
            cnpj_basico: digits_padded(field(fields, 0), 8),
            razao_social: truncate_chars(field(fields, 1), 255).to_string(),
            natureza_juridica: truncate_chars(field(fields, 2), 4).to_string(),
            qualificacao_responsavel: code2(field(fields, 3)),
            capital_social: parse_capital(field(fields, 4)),
            porte_empresa: code2(field(fields, 5)),
            ente_federativo: truncate_chars(field(fields, 6), 100).to_string(),
        })
    }

    pub fn write_copy_line(&self, out: &mut String) {
        push_escaped(out, &self.cnpj_basico);
        out.push('\t');
        push_escaped(out, &self.razao_social);
        out.push('\t');
        push_escaped(out, &self.natureza_juridica);
        out.push('\t');
        push_escaped(out, &self.qualificacao_responsavel);
        out.push('\t');
        out.push_str(&self.capital_social.to_string());
        out.push('\t');
        push_escaped(out, &self.porte_empresa);
        out.push('\t');
        push_escaped(out, &self.ente_federativo);
        out.push('\n');
    }
}

// ---------------------------------------------------------------------------
// simples (7 fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplesRow {
    pub cnpj_basico: String,
    pub opcao_simples: String,
    pub data_opcao_simples: String,
    pub data_exclusao_simples: String,
    pub opcao_mei: String,
    pub data_opcao_mei: String,
    pub data_exclusao_mei: String,
}

impl SimplesRow {
    pub const MIN_FIELDS: usize = 7;

    pub fn from_fields(fields: &[String]) -> Option<Self> {
        if fields.len() < Self::MIN_FIELDS {
            return None;
        }
        Some(Self {
            cnpj_basico: digits_padded(field(fields, 0), 8),
            opcao_simples: truncate_chars(field(fields, 1), 1).to_string(),
            data_opcao_simples: truncate_chars(field(fields, 2), 8).to_string(),
            data_exclusao_simples: truncate_chars(field(fields, 3), 8).to_string(),
            opcao_mei: truncate_chars(field(fields, 4), 1).to_string(),
            data_opcao_mei: truncate_chars(field(fields, 5), 8).to_string(),
            data_exclusao_mei: truncate_chars(field(fields, 6), 8).to_string(),
        })
    }

    pub fn write_copy_line(&self, out: &mut String) {
        for (i, value) in [
            &self.cnpj_basico,
            &self.opcao_simples,
            &self.data_opcao_simples,
            &self.data_exclusao_simples,
            &self.opcao_mei,
            &self.data_opcao_mei,
            &self.data_exclusao_mei,
        ]
        .into_iter()
        .enumerate()
        {
            if i > 0 {
                out.push('\t');
            }
            push_escaped(out, value);
        }
        out.push('\n');
    }
}

// ---------------------------------------------------------------------------
// estabelecimentos (30 fields in, 32 columns out)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstabelecimentoRow {
    pub cnpj14: String,
    pub cnpj_basico: String,
    pub cnpj_ordem: String,
    pub cnpj_dv: String,
    pub matriz_filial: String,
    pub nome_fantasia: String,
    pub situacao_cadastral: String,
    pub data_situacao_cadastral: String,
    pub motivo_situacao_cadastral: String,
    pub nome_cidade_exterior: String,
    pub codigo_pais: String,
    pub pais: String,
    pub data_inicio_atividade: String,
    pub cnae_fiscal_principal: String,
    pub cnae_fiscal_secundaria: String,
    pub tipo_logradouro: String,
    pub logradouro: String,
    pub numero: String,
    pub complemento: String,
    pub bairro: String,
    pub cep: String,
    pub uf: String,
    pub municipio: String,
    pub ddd1: String,
    pub telefone1: String,
    pub ddd2: String,
    pub telefone2: String,
    pub ddd_fax: String,
    pub fax: String,
    pub email: String,
    pub situacao_especial: String,
    pub data_situacao_especial: String,
}

impl EstabelecimentoRow {
    pub const MIN_FIELDS: usize = 30;

    pub fn from_fields(fields: &[String]) -> Option<Self> {
        if fields.len() < Self::MIN_FIELDS {
            return None;
        }
        let cnpj_basico = digits_padded(field(fields, 0), 8);
        let cnpj_ordem = digits_padded(field(fields, 1), 4);
        let cnpj_dv = digits_padded(field(fields, 2), 2);
        let cnpj14 = format!("{cnpj_basico}{cnpj_ordem}{cnpj_dv}");
        Some(Self {
            cnpj14,
            cnpj_basico,
            cnpj_ordem,
            cnpj_dv,
            matriz_filial: truncate_chars(field(fields, 3), 1).to_string(),
            nome_fantasia: truncate_chars(field(fields, 4), 255).to_string(),
            situacao_cadastral: code2(field(fields, 5)),
            data_situacao_cadastral: truncate_chars(field(fields, 6), 8).to_string(),
            motivo_situacao_cadastral: code2(field(fields, 7)),
            nome_cidade_exterior: truncate_chars(field(fields, 8), 100).to_string(),
            codigo_pais: truncate_chars(field(fields, 9), 3).to_string(),
            pais: truncate_chars(field(fields, 10), 100).to_string(),
            data_inicio_atividade: truncate_chars(field(fields, 11), 8).to_string(),
            // Field 12 is the CNAE list: the primary activity is its first
            // seven digits, the full list is kept as the secondary column.
            cnae_fiscal_principal: truncate_chars(field(fields, 12), 7).to_string(),
            cnae_fiscal_secundaria: field(fields, 12).to_string(),
            tipo_logradouro: truncate_chars(field(fields, 13), 50).to_string(),
            logradouro: truncate_chars(field(fields, 14), 255).to_string(),
            numero: truncate_chars(field(fields, 15), 20).to_string(),
            complemento: truncate_chars(field(fields, 16), 255).to_string(),
            bairro: truncate_chars(field(fields, 17), 100).to_string(),
            cep: truncate_chars(field(fields, 18), 8).to_string(),
            uf: truncate_chars(field(fields, 19), 2).to_string(),
            municipio: truncate_chars(field(fields, 20), 100).to_string(),
            ddd1: truncate_chars(field(fields, 21), 4).to_string(),
            telefone1: truncate_chars(field(fields, 22), 20).to_string(),
            ddd2: truncate_chars(field(fields, 23), 4).to_string(),
            telefone2: truncate_chars(field(fields, 24), 20).to_string(),
            ddd_fax: truncate_chars(field(fields, 25), 4).to_string(),
            fax: truncate_chars(field(fields, 26), 20).to_string(),
            email: truncate_chars(field(fields, 27), 255).to_string(),
            situacao_especial: truncate_chars(field(fields, 28), 100).to_string(),
            data_situacao_especial: truncate_chars(field(fields, 29), 8).to_string(),
        })
    }

    /// Cancelled establishments never reach staging.
    pub fn is_cancelled(&self) -> bool {
        self.situacao_cadastral == SITUACAO_CANCELADA
    }

    pub fn write_copy_line(&self, out: &mut String) {
        for (i, value) in [
            &self.cnpj14,
            &self.cnpj_basico,
            &self.cnpj_ordem,
            &self.cnpj_dv,
            &self.matriz_filial,
            &self.nome_fantasia,
            &self.situacao_cadastral,
            &self.data_situacao_cadastral,
            &self.motivo_situacao_cadastral,
            &self.nome_cidade_exterior,
            &self.codigo_pais,
            &self.pais,
            &self.data_inicio_atividade,
            &self.cnae_fiscal_principal,
            &self.cnae_fiscal_secundaria,
            &self.tipo_logradouro,
            &self.logradouro,
            &self.numero,
            &self.complemento,
            &self.bairro,
            &self.cep,
            &self.uf,
            &self.municipio,
            &self.ddd1,
            &self.telefone1,
            &self.ddd2,
            &self.telefone2,
            &self.ddd_fax,
            &self.fax,
            &self.email,
            &self.situacao_especial,
            &self.data_situacao_especial,
        ]
        .into_iter()
        .enumerate()
        {
            if i > 0 {
                out.push('\t');
            }
            push_escaped(out, value);
        }
        out.push('\n');
    }
}

// ---------------------------------------------------------------------------
// socios (11 or 12 fields; the percentual column is absent in some releases)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocioRow {
    pub cnpj_basico: String,
    pub identificador_socio: String,
    pub nome_socio: String,
    pub cnpj_cpf_socio: String,
    pub codigo_qualificacao_socio: String,
    pub percentual_capital_social: String,
    pub data_entrada_sociedade: String,
    pub codigo_pais: String,
    pub cpf_representante_legal: String,
    pub nome_representante_legal: String,
    pub codigo_qualificacao_representante: String,
    pub faixa_etaria: String,
}

impl SocioRow {
    pub const MIN_FIELDS: usize = 11;

    pub fn from_fields(fields: &[String]) -> Option<Self> {
        if fields.len() < Self::MIN_FIELDS {
            return None;
        }
        // 12-field layout carries percentual at index 5 and shifts the rest.
        let has_percentual = fields.len() >= 12;
        let shift = usize::from(has_percentual);
        let percentual = if has_percentual {
            truncate_chars(integer_part(field(fields, 5)), 6).to_string()
        } else {
            String::new()
        };
        Some(Self {
            cnpj_basico: digits_padded(field(fields, 0), 8),
            identificador_socio: truncate_chars(field(fields, 1).trim(), 1).to_string(),
            nome_socio: truncate_chars(field(fields, 2).trim(), 255).to_string(),
            cnpj_cpf_socio: zero_fill(field(fields, 3), 14),
            codigo_qualificacao_socio: code2(field(fields, 4)),
            percentual_capital_social: percentual,
            data_entrada_sociedade: truncate_chars(field(fields, 5 + shift).trim(), 8).to_string(),
            codigo_pais: truncate_chars(field(fields, 6 + shift).trim(), 3).to_string(),
            cpf_representante_legal: zero_fill(field(fields, 7 + shift), 11),
            nome_representante_legal: truncate_chars(field(fields, 8 + shift).trim(), 255)
                .to_string(),
            codigo_qualificacao_representante: code2(field(fields, 9 + shift)),
            faixa_etaria: truncate_chars(field(fields, 10 + shift).trim(), 2).to_string(),
        })
    }

    pub fn write_copy_line(&self, out: &mut String) {
        for (i, value) in [
            &self.cnpj_basico,
            &self.identificador_socio,
            &self.nome_socio,
            &self.cnpj_cpf_socio,
            &self.codigo_qualificacao_socio,
            &self.percentual_capital_social,
            &self.data_entrada_sociedade,
            &self.codigo_pais,
            &self.cpf_representante_legal,
            &self.nome_representante_legal,
            &self.codigo_qualificacao_representante,
            &self.faixa_etaria,
        ]
        .into_iter()
        .enumerate()
        {
            if i > 0 {
                out.push('\t');
            }
            push_escaped(out, value);
        }
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empresa_happy_path() {
        let row = EmpresaRow::from_fields(&fields(&[
            "12345678", "ACME", "2062", "05", "1000,50", "03", "",
        ]))
        .unwrap();
        assert_eq!(row.cnpj_basico, "12345678");
        assert_eq!(row.razao_social, "ACME");
        assert_eq!(row.natureza_juridica, "2062");
        assert_eq!(row.qualificacao_responsavel, "05");
        assert_eq!(row.capital_social, 1000.50);
        assert_eq!(row.porte_empresa, "03");
        assert_eq!(row.ente_federativo, "");
    }

    #[test]
    fn empresa_pads_and_strips_float_codes() {
        let row = EmpresaRow::from_fields(&fields(&[
            "123", "X", "20625", "16.0", "", "5.0", "",
        ]))
        .unwrap();
        assert_eq!(row.cnpj_basico, "00000123");
        assert_eq!(row.natureza_juridica, "2062");
        assert_eq!(row.qualificacao_responsavel, "16");
        assert_eq!(row.capital_social, 0.0);
        assert_eq!(row.porte_empresa, "5");
    }

    #[test]
    fn empresa_malformed_capital_defaults_to_zero() {
        let row =
            EmpresaRow::from_fields(&fields(&["1", "X", "", "", "abc", "", ""])).unwrap();
        assert_eq!(row.capital_social, 0.0);
    }

    #[test]
    fn empresa_short_row_is_rejected() {
        assert!(EmpresaRow::from_fields(&fields(&["12345678", "ACME"])).is_none());
    }

    #[test]
    fn empresa_truncates_long_names() {
        let long = "A".repeat(300);
        let row =
            EmpresaRow::from_fields(&fields(&["1", &long, "", "", "", "", ""])).unwrap();
        assert_eq!(row.razao_social.len(), 255);
    }

    #[test]
    fn simples_happy_path() {
        let row = SimplesRow::from_fields(&fields(&[
            "12345678", "S", "20200101", "", "N", "", "",
        ]))
        .unwrap();
        assert_eq!(row.cnpj_basico, "12345678");
        assert_eq!(row.opcao_simples, "S");
        assert_eq!(row.data_opcao_simples, "20200101");
        assert_eq!(row.opcao_mei, "N");
    }

    fn estabelecimento_fields(situacao: &str) -> Vec<String> {
        let mut f = vec![
            "12345678".to_string(),
            "1".to_string(),
            "23".to_string(),
            "1".to_string(),
            "LOJA ACME".to_string(),
            situacao.to_string(),
            "20200101".to_string(),
            "0".to_string(),
        ];
        f.extend(std::iter::repeat(String::new()).take(11));
        f.push("SP".to_string()); // uf at index 19
        f.extend(std::iter::repeat(String::new()).take(10));
        assert_eq!(f.len(), 30);
        f
    }

    #[test]
    fn estabelecimento_builds_cnpj14_from_padded_parts() {
        let row = EstabelecimentoRow::from_fields(&estabelecimento_fields("2")).unwrap();
        assert_eq!(row.cnpj_ordem, "0001");
        assert_eq!(row.cnpj_dv, "23");
        assert_eq!(row.cnpj14, "12345678000123");
        assert_eq!(row.cnpj14.len(), 14);
        assert_eq!(row.uf, "SP");
        assert!(!row.is_cancelled());
    }

    #[test]
    fn estabelecimento_only_exact_08_is_cancelled() {
        assert!(EstabelecimentoRow::from_fields(&estabelecimento_fields("08"))
            .unwrap()
            .is_cancelled());
        // float-coded "08.0" normalises to "08" and is cancelled too
        assert!(EstabelecimentoRow::from_fields(&estabelecimento_fields("08.0"))
            .unwrap()
            .is_cancelled());
    }

    #[test]
    fn estabelecimento_empty_and_active_statuses_are_kept() {
        for situacao in ["", "2", "8"] {
            let row = EstabelecimentoRow::from_fields(&estabelecimento_fields(situacao)).unwrap();
            assert!(!row.is_cancelled(), "situacao {situacao:?} must be kept");
        }
    }

    #[test]
    fn estabelecimento_short_row_is_rejected() {
        let mut f = estabelecimento_fields("2");
        f.truncate(29);
        assert!(EstabelecimentoRow::from_fields(&f).is_none());
    }

    fn socio_full() -> Vec<String> {
        fields(&[
            "12345678",
            "2",
            "JOHN DOE",
            "12345678901",
            "49.0",
            "50",
            "20190101",
            "105",
            "98765432100",
            "JANE ROE",
            "05",
            "4",
        ])
    }

    #[test]
    fn socio_twelve_field_layout() {
        let row = SocioRow::from_fields(&socio_full()).unwrap();
        assert_eq!(row.cnpj_basico, "12345678");
        assert_eq!(row.identificador_socio, "2");
        assert_eq!(row.nome_socio, "JOHN DOE");
        assert_eq!(row.cnpj_cpf_socio, "00012345678901");
        assert_eq!(row.codigo_qualificacao_socio, "49");
        assert_eq!(row.percentual_capital_social, "50");
        assert_eq!(row.data_entrada_sociedade, "20190101");
        assert_eq!(row.codigo_pais, "105");
        assert_eq!(row.cpf_representante_legal, "98765432100");
        assert_eq!(row.nome_representante_legal, "JANE ROE");
        assert_eq!(row.faixa_etaria, "4");
    }

    #[test]
    fn socio_eleven_field_layout_shifts_left() {
        let mut f = socio_full();
        f.remove(5); // no percentual column
        let row = SocioRow::from_fields(&f).unwrap();
        assert_eq!(row.percentual_capital_social, "");
        assert_eq!(row.data_entrada_sociedade, "20190101");
        assert_eq!(row.codigo_pais, "105");
        assert_eq!(row.faixa_etaria, "4");
    }

    #[test]
    fn socio_masked_document_keeps_its_mask() {
        let mut f = socio_full();
        f[3] = "***456789**".to_string();
        let row = SocioRow::from_fields(&f).unwrap();
        assert_eq!(row.cnpj_cpf_socio, "000***456789**");
    }

    #[test]
    fn socio_ten_fields_rejected() {
        let mut f = socio_full();
        f.truncate(10);
        assert!(SocioRow::from_fields(&f).is_none());
    }

    #[test]
    fn decode_record_handles_latin1_and_nuls() {
        let mut record = csv::ByteRecord::new();
        record.push_field(b"S\xC3O PAULO"); // latin-1 0xC3 = Ã
        record.push_field(b"AB\x00CD");
        let decoded = decode_record(&record);
        assert_eq!(decoded[0], "SÃO PAULO");
        assert_eq!(decoded[1], "ABCD");
    }

    #[test]
    fn escape_preserves_backslash_as_literal() {
        let mut out = String::new();
        push_escaped(&mut out, r"ACME \ CO");
        assert_eq!(out, r"ACME \\ CO");
        // COPY TEXT decodes "\\" back to a single literal backslash.
    }

    #[test]
    fn escape_tabs_and_newlines() {
        let mut out = String::new();
        push_escaped(&mut out, "a\tb\nc\rd");
        assert_eq!(out, "a\\tb\\nc\\rd");
    }

    #[test]
    fn copy_line_has_fixed_field_count() {
        let row = EstabelecimentoRow::from_fields(&estabelecimento_fields("2")).unwrap();
        let mut line = String::new();
        row.write_copy_line(&mut line);
        assert!(line.ends_with('\n'));
        assert_eq!(line.trim_end_matches('\n').split('\t').count(), 32);

        let empresa = EmpresaRow::from_fields(&fields(&[
            "12345678", "ACME", "2062", "05", "1000,50", "03", "",
        ]))
        .unwrap();
        let mut line = String::new();
        empresa.write_copy_line(&mut line);
        assert_eq!(line.trim_end_matches('\n').split('\t').count(), 7);
        assert!(line.contains("1000.5"));
    }
}
