//! Document Builder: request JSON → canonical fiscal document.
//!
//! The build is all-or-nothing. Missing blocks, bad item numbering and invalid
//! identification fields are collected and returned together; no partially
//! built document ever leaves this module.

use std::collections::HashSet;

use rand::Rng;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use fiscalflow_core::id::only_digits;
use fiscalflow_core::{Coerced, DocumentKey, KeyParts, Money, Quantity, Rate, UnitValue};

use crate::document::{
    AdditionalInfo, Address, CanonicalDocument, ContributionLine, DocumentStatus, DocumentTotals,
    IcmsLine, Identification, LineItem, Party, Payment, PaymentDetail, ProductLine, ReformLine,
};
use crate::request::{
    self, AddressRequest, DocumentRequest, IssuerRequest, ItemRequest, RecipientRequest, text,
};
use crate::totals::accumulate_reform;

/// `ICMSTot` tags in layout order.
pub const ICMS_TOTAL_FIELDS: [&str; 20] = [
    "vBC", "vICMS", "vICMSDeson", "vFCP", "vBCST", "vST", "vFCPST", "vFCPSTRet", "vProd",
    "vFrete", "vSeg", "vDesc", "vII", "vIPI", "vIPIDevol", "vPIS", "vCOFINS", "vOutro", "vNF",
    "vTotTrib",
];

const NO_GTIN: &str = "SEM GTIN";
const DEFAULT_COUNTRY_CODE: i64 = 1058;
const DEFAULT_COUNTRY: &str = "BRASIL";
/// `modFrete` 9: no freight.
const DEFAULT_FREIGHT_MODE: i64 = 9;

/// Why a build failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildIssue {
    #[error("missing required block: {block}")]
    MissingBlock { block: &'static str },

    #[error("item at position {position} has an invalid nItem ({reason})")]
    InvalidItemSequence { position: usize, reason: String },

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

impl BuildIssue {
    fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Authorized-reader CNPJ a jurisdiction requires when the request has none.
pub fn default_authorized_reader(jurisdiction: &str) -> Option<&'static str> {
    match jurisdiction.trim().to_ascii_uppercase().as_str() {
        "BA" => Some("13937073000156"),
        _ => None,
    }
}

/// Builder settings that come from configuration, not from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderConfig {
    /// Two-letter jurisdiction (UF) of the issuer.
    pub jurisdiction: String,
    /// `tpAmb` used when the request does not set one (1 production, 2 homologation).
    pub environment: u8,
    /// Overrides the jurisdiction's default authorized reader.
    pub authorized_reader: Option<String>,
}

impl BuilderConfig {
    pub fn new(jurisdiction: impl Into<String>) -> Self {
        Self {
            jurisdiction: jurisdiction.into(),
            environment: 2,
            authorized_reader: None,
        }
    }

    pub fn with_environment(mut self, environment: u8) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_authorized_reader(mut self, cnpj: impl Into<String>) -> Self {
        self.authorized_reader = Some(cnpj.into());
        self
    }

    fn injected_reader(&self) -> Option<String> {
        self.authorized_reader
            .as_deref()
            .map(only_digits)
            .filter(|d| !d.is_empty())
            .or_else(|| default_authorized_reader(&self.jurisdiction).map(str::to_string))
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self::new("BA")
    }
}

#[derive(Debug, Clone, Default)]
pub struct DocumentBuilder {
    config: BuilderConfig,
}

/// Collects the names of fields whose non-numeric input was read as zero,
/// and of fields too large for the layout.
#[derive(Default)]
struct Coercions {
    coerced: Vec<String>,
    oversized: Vec<String>,
}

impl Coercions {
    fn read<T>(&mut self, path: &str, value: Option<&Value>, f: fn(Option<&Value>) -> Coerced<T>) -> T {
        let c = f(value);
        if c.coerced {
            warn!(field = path, "non-numeric value read as zero");
            self.coerced.push(path.to_string());
        }
        if c.out_of_range {
            self.oversized.push(path.to_string());
        }
        c.value
    }

    fn oversized_issues(&mut self) -> Vec<BuildIssue> {
        self.oversized
            .drain(..)
            .map(|field| BuildIssue::field(field, "more integer digits than the layout allows"))
            .collect()
    }

    fn money(&mut self, path: &str, value: &Option<Value>) -> Money {
        self.read(path, value.as_ref(), Money::coerce)
    }

    fn money_in(&mut self, path: &str, map: &Map<String, Value>, tag: &str) -> Money {
        self.read(&format!("{path}.{tag}"), map.get(tag), Money::coerce)
    }

    fn rate_in(&mut self, path: &str, map: &Map<String, Value>, tag: &str) -> Rate {
        self.read(&format!("{path}.{tag}"), map.get(tag), Rate::coerce)
    }
}

impl DocumentBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    /// Key a request can be identified by before it is built.
    ///
    /// Either the pre-declared `chave`, or the key derived from the request
    /// fields when they include the numeric code (`cNF`). Without `cNF` the key
    /// would be random, so no idempotency key exists.
    pub fn derive_key(&self, req: &DocumentRequest) -> Option<DocumentKey> {
        if let Some(key) = declared_key(req) {
            return Some(key);
        }
        let ide = req.ide.as_ref()?;
        let emit = req.emit.as_ref()?;
        let numeric_code = parse_numeric_code(text(&ide.numeric_code))?;
        let parts = key_parts(ide, emit, numeric_code).ok()?;
        DocumentKey::derive(&parts).ok()
    }

    /// Build the canonical document or report every issue found.
    pub fn build(&self, req: &DocumentRequest) -> Result<CanonicalDocument, Vec<BuildIssue>> {
        let (ide, emit, dest, icms_totals) = required_blocks(req)?;

        let mut issues = validate_items(&req.itens);
        let declared = match text(&req.chave) {
            "" => None,
            raw => match raw.parse::<DocumentKey>() {
                Ok(k) => Some(k),
                Err(e) => {
                    issues.push(BuildIssue::field("chave", e.to_string()));
                    None
                }
            },
        };

        let numeric_code = match text(&ide.numeric_code) {
            "" => declared
                .as_ref()
                .and_then(|k| parse_numeric_code(&k.as_str()[35..43]))
                .unwrap_or_else(|| rand::thread_rng().gen_range(1..=99_999_999)),
            raw => match parse_numeric_code(raw) {
                Some(n) => n,
                None => {
                    issues.push(BuildIssue::field("ide.cNF", "must be at most eight digits"));
                    0
                }
            },
        };

        let parts = match key_parts(ide, emit, numeric_code) {
            Ok(p) => Some(p),
            Err(mut e) => {
                issues.append(&mut e);
                None
            }
        };
        if !issues.is_empty() {
            return Err(issues);
        }
        let parts = parts.ok_or_else(Vec::new)?;

        let key = DocumentKey::derive(&parts)
            .map_err(|e| vec![BuildIssue::field("chave", e.to_string())])?;
        if let Some(declared) = declared {
            if declared != key {
                return Err(vec![BuildIssue::field(
                    "chave",
                    format!("declared key {declared} does not match document fields ({key})"),
                )]);
            }
        }

        let mut coercions = Coercions::default();
        let environment = request::int(&ide.environment)
            .and_then(|v| u8::try_from(v).ok())
            .unwrap_or(self.config.environment);

        let identification = Identification {
            jurisdiction_code: parts.jurisdiction_code,
            numeric_code,
            nature: text(&ide.nature).to_string(),
            model: parts.model,
            series: parts.series,
            number: parts.number,
            issued_at: text(&ide.issued_at).to_string(),
            operation_type: request::int(&ide.operation_type).unwrap_or(1),
            destination: request::int(&ide.destination).unwrap_or(1),
            municipality: request::int(&ide.municipality).unwrap_or(0),
            print_format: request::int(&ide.print_format).unwrap_or(1),
            emission_type: parts.emission_type,
            environment,
            purpose: request::int(&ide.purpose).unwrap_or(1),
            final_consumer: request::int(&ide.final_consumer).unwrap_or(0),
            presence: request::int(&ide.presence).unwrap_or(1),
            emission_process: request::int(&ide.emission_process).unwrap_or(0),
            process_version: text(&ide.process_version).to_string(),
        };

        let items: Vec<LineItem> = req
            .itens
            .iter()
            .enumerate()
            .map(|(pos, item)| build_item(pos, item, &mut coercions))
            .collect();

        let mut icms = Vec::with_capacity(ICMS_TOTAL_FIELDS.len());
        for tag in ICMS_TOTAL_FIELDS {
            icms.push((tag, coercions.money_in("totais.ICMSTot", icms_totals, tag)));
        }

        let mut authorized_readers: Vec<String> = req
            .authorized_readers
            .iter()
            .map(|r| {
                let cnpj = only_digits(text(&r.cnpj));
                if cnpj.is_empty() { only_digits(text(&r.cpf)) } else { cnpj }
            })
            .filter(|d| !d.is_empty())
            .collect();
        if authorized_readers.is_empty() {
            if let Some(reader) = self.config.injected_reader() {
                debug!(key = %key, reader = %reader, "injecting jurisdiction authorized reader");
                authorized_readers.push(reader);
            }
        }

        let freight_mode = req
            .transp
            .as_ref()
            .and_then(|t| request::int(&t.freight_mode))
            .unwrap_or(DEFAULT_FREIGHT_MODE);

        let payment = req
            .pag
            .as_ref()
            .filter(|p| !p.details.is_empty())
            .map(|p| Payment {
                change: coercions.money("pag.vTroco", &p.change),
                details: p
                    .details
                    .iter()
                    .enumerate()
                    .map(|(i, d)| PaymentDetail {
                        indicator: request::int(&d.indicator).unwrap_or(0),
                        method: non_empty(text(&d.method), "01"),
                        amount: coercions.money(&format!("pag.detPag[{i}].vPag"), &d.amount),
                    })
                    .collect(),
            });

        let oversized = coercions.oversized_issues();
        if !oversized.is_empty() {
            return Err(oversized);
        }
        let reform = accumulate_reform(&items);
        if req.totais.as_ref().and_then(|t| t.reform.as_ref()).is_some() {
            debug!(key = %key, "declared IBSCBSTot replaced by item accumulation");
        }

        let additional_info = req
            .additional_info
            .as_ref()
            .map(|a| AdditionalInfo {
                fiscal: text(&a.fiscal).to_string(),
                complementary: text(&a.complementary).to_string(),
            })
            .filter(|a| !a.fiscal.is_empty() || !a.complementary.is_empty());

        Ok(CanonicalDocument {
            key,
            status: DocumentStatus::Built,
            identification,
            issuer: issuer_party(emit),
            recipient: recipient_party(dest),
            authorized_readers,
            items,
            totals: DocumentTotals { icms, reform },
            freight_mode,
            payment,
            additional_info,
            integration_id: Some(text(&req.integration_id).to_string()).filter(|s| !s.is_empty()),
            coerced_fields: coercions.coerced,
        })
    }
}

type Blocks<'a> = (
    &'a request::Identification,
    &'a IssuerRequest,
    &'a RecipientRequest,
    &'a Map<String, Value>,
);

fn required_blocks(req: &DocumentRequest) -> Result<Blocks<'_>, Vec<BuildIssue>> {
    let icms_totals = req.totais.as_ref().and_then(|t| t.icms.as_ref());
    let mut missing = Vec::new();
    if req.ide.is_none() {
        missing.push(BuildIssue::MissingBlock { block: "ide" });
    }
    if req.emit.is_none() {
        missing.push(BuildIssue::MissingBlock { block: "emit" });
    }
    if req.dest.is_none() {
        missing.push(BuildIssue::MissingBlock { block: "dest" });
    }
    if req.itens.is_empty() {
        missing.push(BuildIssue::MissingBlock { block: "itens" });
    }
    if icms_totals.is_none() {
        missing.push(BuildIssue::MissingBlock { block: "totais.ICMSTot" });
    }
    match (&req.ide, &req.emit, &req.dest, icms_totals) {
        (Some(ide), Some(emit), Some(dest), Some(tot)) if missing.is_empty() => {
            Ok((ide, emit, dest, tot))
        }
        _ => Err(missing),
    }
}

fn validate_items(items: &[ItemRequest]) -> Vec<BuildIssue> {
    let mut seen = HashSet::new();
    let mut issues = Vec::new();
    for (position, item) in items.iter().enumerate() {
        match request::int(&item.number) {
            Some(n) if n > 0 && n <= 990 => {
                if !seen.insert(n) {
                    issues.push(BuildIssue::InvalidItemSequence {
                        position,
                        reason: format!("duplicate nItem {n}"),
                    });
                }
            }
            Some(n) => issues.push(BuildIssue::InvalidItemSequence {
                position,
                reason: format!("nItem {n} out of range 1..=990"),
            }),
            None => issues.push(BuildIssue::InvalidItemSequence {
                position,
                reason: "nItem missing".to_string(),
            }),
        }
    }
    issues
}

fn declared_key(req: &DocumentRequest) -> Option<DocumentKey> {
    text(&req.chave).parse().ok()
}

fn parse_numeric_code(raw: &str) -> Option<u32> {
    let digits = only_digits(raw);
    if digits.is_empty() || digits.len() > 8 || digits.len() != raw.trim().len() {
        return None;
    }
    digits.parse().ok()
}

fn key_parts(
    ide: &request::Identification,
    emit: &IssuerRequest,
    numeric_code: u32,
) -> Result<KeyParts, Vec<BuildIssue>> {
    let mut issues = Vec::new();

    let jurisdiction_code = match request::int(&ide.jurisdiction_code) {
        Some(v @ 11..=99) => v as u8,
        _ => {
            issues.push(BuildIssue::field("ide.cUF", "must be a two-digit IBGE code"));
            0
        }
    };
    let model = match request::int(&ide.model) {
        Some(v @ (55 | 65)) => v as u8,
        None => 55,
        Some(v) => {
            issues.push(BuildIssue::field("ide.mod", format!("unsupported model {v}")));
            0
        }
    };
    let series = match request::int(&ide.series) {
        Some(v @ 0..=999) => v as u16,
        None => 1,
        Some(v) => {
            issues.push(BuildIssue::field("ide.serie", format!("{v} outside 0..=999")));
            0
        }
    };
    let number = match request::int(&ide.number) {
        Some(v @ 1..=999_999_999) => v as u32,
        _ => {
            issues.push(BuildIssue::field("ide.nNF", "must be greater than zero"));
            0
        }
    };
    let emission_type = match request::int(&ide.emission_type) {
        Some(v @ 1..=9) => v as u8,
        None => 1,
        Some(v) => {
            issues.push(BuildIssue::field("ide.tpEmis", format!("invalid value {v}")));
            0
        }
    };
    let year_month = match year_month(text(&ide.issued_at)) {
        Some(ym) => ym,
        None => {
            issues.push(BuildIssue::field("ide.dhEmi", "must be an ISO-8601 date-time"));
            String::new()
        }
    };
    let issuer_id = {
        let cnpj = only_digits(text(&emit.cnpj));
        let cpf = only_digits(text(&emit.cpf));
        match (cnpj.len(), cpf.len()) {
            (14, _) => cnpj,
            (0, 11) => cpf,
            _ => {
                issues.push(BuildIssue::field("emit.CNPJ", "issuer needs a 14-digit CNPJ or 11-digit CPF"));
                String::new()
            }
        }
    };

    if !issues.is_empty() {
        return Err(issues);
    }
    Ok(KeyParts {
        jurisdiction_code,
        year_month,
        issuer_id,
        model,
        series,
        number,
        emission_type,
        numeric_code,
    })
}

/// `AAMM` of the emission date-time.
fn year_month(issued_at: &str) -> Option<String> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(issued_at) {
        return Some(dt.format("%y%m").to_string());
    }
    let date = issued_at.get(..10)?;
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%y%m").to_string())
}

fn non_empty(s: &str, default: &str) -> String {
    if s.is_empty() { default.to_string() } else { s.to_string() }
}

fn address(a: Option<&AddressRequest>) -> Address {
    let Some(a) = a else {
        return Address {
            country_code: DEFAULT_COUNTRY_CODE,
            country: DEFAULT_COUNTRY.to_string(),
            ..Address::default()
        };
    };
    Address {
        street: text(&a.street).to_string(),
        number: text(&a.number).to_string(),
        complement: text(&a.complement).to_string(),
        district: text(&a.district).to_string(),
        municipality_code: request::int(&a.municipality_code).unwrap_or(0),
        municipality: text(&a.municipality).to_string(),
        state: text(&a.state).to_string(),
        postal_code: only_digits(text(&a.postal_code)),
        country_code: request::int(&a.country_code).unwrap_or(DEFAULT_COUNTRY_CODE),
        country: non_empty(text(&a.country), DEFAULT_COUNTRY),
        phone: only_digits(text(&a.phone)),
    }
}

fn tax_ids(cnpj: &Option<request::Text>, cpf: &Option<request::Text>) -> (Option<String>, Option<String>) {
    let cnpj = Some(only_digits(text(cnpj))).filter(|d| !d.is_empty());
    let cpf = Some(only_digits(text(cpf))).filter(|d| !d.is_empty());
    (cnpj, cpf)
}

fn issuer_party(emit: &IssuerRequest) -> Party {
    let (cnpj, cpf) = tax_ids(&emit.cnpj, &emit.cpf);
    Party {
        cnpj,
        cpf,
        name: text(&emit.name).to_string(),
        trade_name: text(&emit.trade_name).to_string(),
        state_registration: text(&emit.state_registration).to_string(),
        municipal_registration: text(&emit.municipal_registration).to_string(),
        activity_code: text(&emit.activity_code).to_string(),
        regime: request::int(&emit.tax_regime).unwrap_or(1),
        email: String::new(),
        address: address(emit.address.as_ref()),
    }
}

fn recipient_party(dest: &RecipientRequest) -> Party {
    let (cnpj, cpf) = tax_ids(&dest.cnpj, &dest.cpf);
    Party {
        cnpj,
        cpf,
        name: text(&dest.name).to_string(),
        trade_name: String::new(),
        state_registration: text(&dest.state_registration).to_string(),
        municipal_registration: String::new(),
        activity_code: String::new(),
        regime: request::int(&dest.registration_indicator).unwrap_or(9),
        email: text(&dest.email).to_string(),
        address: address(dest.address.as_ref()),
    }
}

fn build_item(pos: usize, item: &ItemRequest, c: &mut Coercions) -> LineItem {
    let path = format!("itens[{pos}]");
    let p = &item.prod;
    let quantity = c.read(&format!("{path}.prod.qCom"), p.quantity.as_ref(), Quantity::coerce);
    let unit_value = c.read(&format!("{path}.prod.vUnCom"), p.unit_value.as_ref(), UnitValue::coerce);
    let unit = text(&p.unit).to_string();

    let product = ProductLine {
        code: text(&p.code).to_string(),
        ean: non_empty(text(&p.ean), NO_GTIN),
        description: text(&p.description).to_string(),
        ncm: text(&p.ncm).to_string(),
        cfop: text(&p.cfop).to_string(),
        quantity,
        unit_value,
        gross: c.money(&format!("{path}.prod.vProd"), &p.gross),
        ean_taxable: non_empty(text(&p.ean_taxable), NO_GTIN),
        unit_taxable: non_empty(text(&p.unit_taxable), &unit),
        quantity_taxable: match p.quantity_taxable {
            Some(_) => c.read(&format!("{path}.prod.qTrib"), p.quantity_taxable.as_ref(), Quantity::coerce),
            None => quantity,
        },
        unit_value_taxable: match p.unit_value_taxable {
            Some(_) => c.read(&format!("{path}.prod.vUnTrib"), p.unit_value_taxable.as_ref(), UnitValue::coerce),
            None => unit_value,
        },
        freight: c.money(&format!("{path}.prod.vFrete"), &p.freight),
        insurance: c.money(&format!("{path}.prod.vSeg"), &p.insurance),
        discount: c.money(&format!("{path}.prod.vDesc"), &p.discount),
        other: c.money(&format!("{path}.prod.vOutro"), &p.other),
        in_total: request::int(&p.in_total).unwrap_or(1),
        unit,
    };

    let taxes = &item.imposto;
    let icms = taxes.icms.as_ref().map(|i| IcmsLine {
        origin: request::int(&i.orig).unwrap_or(0),
        cst: non_empty(text(&i.cst), "00"),
        base_mode: request::int(&i.base_mode).unwrap_or(3),
        base: c.money(&format!("{path}.imposto.ICMS.vBC"), &i.base),
        rate: c.read(&format!("{path}.imposto.ICMS.pICMS"), i.rate.as_ref(), Rate::coerce),
        value: c.money(&format!("{path}.imposto.ICMS.vICMS"), &i.value),
    });
    let pis = taxes
        .pis
        .as_ref()
        .map(|m| contribution(m, &format!("{path}.imposto.PIS"), "pPIS", "vPIS", c));
    let cofins = taxes
        .cofins
        .as_ref()
        .map(|m| contribution(m, &format!("{path}.imposto.COFINS"), "pCOFINS", "vCOFINS", c));

    let reform = taxes.reform.as_ref().map(|r| {
        let g = format!("{path}.imposto.IBSCBS");
        let empty = Map::new();
        let uf = r.ibs_state.as_ref().unwrap_or(&empty);
        let mun = r.ibs_municipal.as_ref().unwrap_or(&empty);
        let cbs = r.cbs.as_ref().unwrap_or(&empty);
        ReformLine {
            cst: text(&r.cst).to_string(),
            class_code: text(&r.class_code).to_string(),
            base: c.money(&format!("{g}.vBC"), &r.base),
            ibs_state_rate: c.rate_in(&format!("{g}.gIBSUF"), uf, "pIBSUF"),
            ibs_state: c.money_in(&format!("{g}.gIBSUF"), uf, "vIBSUF"),
            ibs_municipal_rate: c.rate_in(&format!("{g}.gIBSMun"), mun, "pIBSMun"),
            ibs_municipal: c.money_in(&format!("{g}.gIBSMun"), mun, "vIBSMun"),
            cbs_rate: c.rate_in(&format!("{g}.gCBS"), cbs, "pCBS"),
            cbs: c.money_in(&format!("{g}.gCBS"), cbs, "vCBS"),
        }
    });

    LineItem {
        number: request::int(&item.number).and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
        product,
        total_tax: c.money(&format!("{path}.imposto.vTotTrib"), &taxes.total_tax),
        icms,
        pis,
        cofins,
        reform,
    }
}

fn contribution(
    map: &Map<String, Value>,
    path: &str,
    rate_tag: &str,
    value_tag: &str,
    c: &mut Coercions,
) -> ContributionLine {
    let cst = match map.get("CST") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => format!("{:0>2}", n),
        _ => "01".to_string(),
    };
    ContributionLine {
        cst,
        base: c.money_in(path, map, "vBC"),
        rate: c.rate_in(path, map, rate_tag),
        value: c.money_in(path, map, value_tag),
    }
}
