//! Inbound document request (integration JSON).
//!
//! Field names follow the fiscal layout tags (`ide`, `emit`, `vProd`, ...) so
//! integrators can post the same JSON they already produce. Parsing is lenient:
//! text fields accept numbers, numeric fields are kept as raw JSON and read
//! by the builder, which records any coercion it had to make.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Text field that also accepts numbers and booleans.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Text(pub String);

impl Text {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Text {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(Text(s)),
            Value::Number(n) => Ok(Text(n.to_string())),
            Value::Bool(b) => Ok(Text(b.to_string())),
            Value::Null => Ok(Text::default()),
            other => Err(de::Error::custom(format!("expected text, got {other}"))),
        }
    }
}

/// Optional text as a trimmed `&str`, empty when absent.
pub fn text(t: &Option<Text>) -> &str {
    t.as_ref().map(|t| t.0.trim()).unwrap_or("")
}

/// Integer field read from a number or a numeric string.
pub fn int(v: &Option<Value>) -> Option<i64> {
    match v.as_ref()? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentRequest {
    /// Pre-declared Document Key, used for idempotency checks.
    #[serde(default, alias = "chNFe")]
    pub chave: Option<Text>,
    #[serde(default, rename = "idIntegracao")]
    pub integration_id: Option<Text>,
    #[serde(default)]
    pub ide: Option<Identification>,
    #[serde(default)]
    pub emit: Option<IssuerRequest>,
    #[serde(default)]
    pub dest: Option<RecipientRequest>,
    #[serde(default)]
    pub itens: Vec<ItemRequest>,
    #[serde(default)]
    pub totais: Option<TotalsRequest>,
    #[serde(default)]
    pub transp: Option<TransportRequest>,
    #[serde(default)]
    pub pag: Option<PaymentRequest>,
    #[serde(default, rename = "infAdic")]
    pub additional_info: Option<AdditionalInfoRequest>,
    #[serde(default, rename = "autXML")]
    pub authorized_readers: Vec<ReaderRequest>,
}

impl DocumentRequest {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Identification {
    #[serde(default, rename = "cUF")]
    pub jurisdiction_code: Option<Value>,
    #[serde(default, rename = "cNF")]
    pub numeric_code: Option<Text>,
    #[serde(default, rename = "natOp")]
    pub nature: Option<Text>,
    #[serde(default, rename = "mod")]
    pub model: Option<Value>,
    #[serde(default, rename = "serie")]
    pub series: Option<Value>,
    #[serde(default, rename = "nNF")]
    pub number: Option<Value>,
    #[serde(default, rename = "dhEmi")]
    pub issued_at: Option<Text>,
    #[serde(default, rename = "tpNF")]
    pub operation_type: Option<Value>,
    #[serde(default, rename = "idDest")]
    pub destination: Option<Value>,
    #[serde(default, rename = "cMunFG")]
    pub municipality: Option<Value>,
    #[serde(default, rename = "tpImp")]
    pub print_format: Option<Value>,
    #[serde(default, rename = "tpEmis")]
    pub emission_type: Option<Value>,
    #[serde(default, rename = "tpAmb")]
    pub environment: Option<Value>,
    #[serde(default, rename = "finNFe")]
    pub purpose: Option<Value>,
    #[serde(default, rename = "indFinal")]
    pub final_consumer: Option<Value>,
    #[serde(default, rename = "indPres")]
    pub presence: Option<Value>,
    #[serde(default, rename = "procEmi")]
    pub emission_process: Option<Value>,
    #[serde(default, rename = "verProc")]
    pub process_version: Option<Text>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressRequest {
    #[serde(default, rename = "xLgr")]
    pub street: Option<Text>,
    #[serde(default, rename = "nro")]
    pub number: Option<Text>,
    #[serde(default, rename = "xCpl")]
    pub complement: Option<Text>,
    #[serde(default, rename = "xBairro")]
    pub district: Option<Text>,
    #[serde(default, rename = "cMun")]
    pub municipality_code: Option<Value>,
    #[serde(default, rename = "xMun")]
    pub municipality: Option<Text>,
    #[serde(default, rename = "UF")]
    pub state: Option<Text>,
    #[serde(default, rename = "CEP")]
    pub postal_code: Option<Text>,
    #[serde(default, rename = "cPais")]
    pub country_code: Option<Value>,
    #[serde(default, rename = "xPais")]
    pub country: Option<Text>,
    #[serde(default, rename = "fone")]
    pub phone: Option<Text>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssuerRequest {
    #[serde(default, rename = "CNPJ")]
    pub cnpj: Option<Text>,
    #[serde(default, rename = "CPF")]
    pub cpf: Option<Text>,
    #[serde(default, rename = "xNome")]
    pub name: Option<Text>,
    #[serde(default, rename = "xFant")]
    pub trade_name: Option<Text>,
    #[serde(default, rename = "IE")]
    pub state_registration: Option<Text>,
    #[serde(default, rename = "IM")]
    pub municipal_registration: Option<Text>,
    #[serde(default, rename = "CNAE")]
    pub activity_code: Option<Text>,
    #[serde(default, rename = "CRT")]
    pub tax_regime: Option<Value>,
    #[serde(default, rename = "enderEmit")]
    pub address: Option<AddressRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipientRequest {
    #[serde(default, rename = "CNPJ")]
    pub cnpj: Option<Text>,
    #[serde(default, rename = "CPF")]
    pub cpf: Option<Text>,
    #[serde(default, rename = "xNome")]
    pub name: Option<Text>,
    #[serde(default, rename = "indIEDest")]
    pub registration_indicator: Option<Value>,
    #[serde(default, rename = "IE")]
    pub state_registration: Option<Text>,
    #[serde(default)]
    pub email: Option<Text>,
    #[serde(default, rename = "enderDest")]
    pub address: Option<AddressRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReaderRequest {
    #[serde(default, rename = "CNPJ")]
    pub cnpj: Option<Text>,
    #[serde(default, rename = "CPF")]
    pub cpf: Option<Text>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemRequest {
    #[serde(default, rename = "nItem")]
    pub number: Option<Value>,
    #[serde(default)]
    pub prod: ProductRequest,
    #[serde(default)]
    pub imposto: TaxesRequest,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductRequest {
    #[serde(default, rename = "cProd")]
    pub code: Option<Text>,
    #[serde(default, rename = "cEAN")]
    pub ean: Option<Text>,
    #[serde(default, rename = "xProd")]
    pub description: Option<Text>,
    #[serde(default, rename = "NCM")]
    pub ncm: Option<Text>,
    #[serde(default, rename = "CFOP")]
    pub cfop: Option<Text>,
    #[serde(default, rename = "uCom")]
    pub unit: Option<Text>,
    #[serde(default, rename = "qCom")]
    pub quantity: Option<Value>,
    #[serde(default, rename = "vUnCom")]
    pub unit_value: Option<Value>,
    #[serde(default, rename = "vProd")]
    pub gross: Option<Value>,
    #[serde(default, rename = "cEANTrib")]
    pub ean_taxable: Option<Text>,
    #[serde(default, rename = "uTrib")]
    pub unit_taxable: Option<Text>,
    #[serde(default, rename = "qTrib")]
    pub quantity_taxable: Option<Value>,
    #[serde(default, rename = "vUnTrib")]
    pub unit_value_taxable: Option<Value>,
    #[serde(default, rename = "vFrete")]
    pub freight: Option<Value>,
    #[serde(default, rename = "vSeg")]
    pub insurance: Option<Value>,
    #[serde(default, rename = "vDesc")]
    pub discount: Option<Value>,
    #[serde(default, rename = "vOutro")]
    pub other: Option<Value>,
    #[serde(default, rename = "indTot")]
    pub in_total: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaxesRequest {
    #[serde(default, rename = "vTotTrib")]
    pub total_tax: Option<Value>,
    #[serde(default, rename = "ICMS")]
    pub icms: Option<IcmsRequest>,
    #[serde(default, rename = "PIS")]
    pub pis: Option<Map<String, Value>>,
    #[serde(default, rename = "COFINS")]
    pub cofins: Option<Map<String, Value>>,
    #[serde(default, rename = "IBSCBS")]
    pub reform: Option<ReformRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IcmsRequest {
    #[serde(default)]
    pub orig: Option<Value>,
    #[serde(default, rename = "CST")]
    pub cst: Option<Text>,
    #[serde(default, rename = "modBC")]
    pub base_mode: Option<Value>,
    #[serde(default, rename = "vBC")]
    pub base: Option<Value>,
    #[serde(default, rename = "pICMS")]
    pub rate: Option<Value>,
    #[serde(default, rename = "vICMS")]
    pub value: Option<Value>,
}

/// Reform-regime (IBS/CBS) group of one item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReformRequest {
    #[serde(default, rename = "CST")]
    pub cst: Option<Text>,
    #[serde(default, rename = "cClassTrib")]
    pub class_code: Option<Text>,
    #[serde(default, rename = "vBC")]
    pub base: Option<Value>,
    #[serde(default, rename = "gIBSUF")]
    pub ibs_state: Option<Map<String, Value>>,
    #[serde(default, rename = "gIBSMun")]
    pub ibs_municipal: Option<Map<String, Value>>,
    #[serde(default, rename = "gCBS")]
    pub cbs: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TotalsRequest {
    #[serde(default, rename = "ICMSTot")]
    pub icms: Option<Map<String, Value>>,
    /// Advisory only: recomputed from the items.
    #[serde(default, rename = "IBSCBSTot")]
    pub reform: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportRequest {
    #[serde(default, rename = "modFrete")]
    pub freight_mode: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentRequest {
    #[serde(default, rename = "vTroco")]
    pub change: Option<Value>,
    #[serde(default, rename = "detPag")]
    pub details: Vec<PaymentDetailRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentDetailRequest {
    #[serde(default, rename = "indPag")]
    pub indicator: Option<Value>,
    #[serde(default, rename = "tPag")]
    pub method: Option<Text>,
    #[serde(default, rename = "vPag")]
    pub amount: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdditionalInfoRequest {
    #[serde(default, rename = "infAdFisco")]
    pub fiscal: Option<Text>,
    #[serde(default, rename = "infCpl")]
    pub complementary: Option<Text>,
}
