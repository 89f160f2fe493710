use serde::Serialize;

use fiscalflow_core::{DocumentKey, Lifecycle, Money, Quantity, Rate, UnitValue};

/// Document lifecycle.
///
/// `Authorized` and `Denied` are terminal for the key: nothing may be
/// transmitted under it again. `Rejected` ends the attempt only; a corrected
/// request is built again and gets a fresh key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Built,
    Signed,
    Transmitted,
    Authorized,
    Denied,
    Rejected,
}

impl DocumentStatus {
    /// Whether the key may never be transmitted again.
    pub fn blocks_resubmission(self) -> bool {
        matches!(self, DocumentStatus::Authorized | DocumentStatus::Denied)
    }
}

impl Lifecycle for DocumentStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Built, Signed)
                | (Signed, Transmitted)
                | (Transmitted, Authorized)
                | (Transmitted, Denied)
                | (Transmitted, Rejected)
        )
    }

    fn is_terminal(self) -> bool {
        self.blocks_resubmission()
    }
}

/// Document identification (`ide`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identification {
    pub jurisdiction_code: u8,
    pub numeric_code: u32,
    pub nature: String,
    pub model: u8,
    pub series: u16,
    pub number: u32,
    pub issued_at: String,
    pub operation_type: i64,
    pub destination: i64,
    pub municipality: i64,
    pub print_format: i64,
    pub emission_type: u8,
    pub environment: u8,
    pub purpose: i64,
    pub final_consumer: i64,
    pub presence: i64,
    pub emission_process: i64,
    pub process_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Address {
    pub street: String,
    pub number: String,
    pub complement: String,
    pub district: String,
    pub municipality_code: i64,
    pub municipality: String,
    pub state: String,
    pub postal_code: String,
    pub country_code: i64,
    pub country: String,
    pub phone: String,
}

/// Issuer or recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Party {
    pub cnpj: Option<String>,
    pub cpf: Option<String>,
    pub name: String,
    pub trade_name: String,
    pub state_registration: String,
    pub municipal_registration: String,
    pub activity_code: String,
    /// `CRT` for the issuer, `indIEDest` for the recipient.
    pub regime: i64,
    pub email: String,
    pub address: Address,
}

impl Party {
    pub fn tax_id(&self) -> Option<&str> {
        self.cnpj.as_deref().or(self.cpf.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductLine {
    pub code: String,
    pub ean: String,
    pub description: String,
    pub ncm: String,
    pub cfop: String,
    pub unit: String,
    pub quantity: Quantity,
    pub unit_value: UnitValue,
    pub gross: Money,
    pub ean_taxable: String,
    pub unit_taxable: String,
    pub quantity_taxable: Quantity,
    pub unit_value_taxable: UnitValue,
    pub freight: Money,
    pub insurance: Money,
    pub discount: Money,
    pub other: Money,
    pub in_total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IcmsLine {
    pub origin: i64,
    pub cst: String,
    pub base_mode: i64,
    pub base: Money,
    pub rate: Rate,
    pub value: Money,
}

/// PIS or COFINS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContributionLine {
    pub cst: String,
    pub base: Money,
    pub rate: Rate,
    pub value: Money,
}

/// Reform-regime (IBS/CBS) group of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReformLine {
    pub cst: String,
    pub class_code: String,
    pub base: Money,
    pub ibs_state_rate: Rate,
    pub ibs_state: Money,
    pub ibs_municipal_rate: Rate,
    pub ibs_municipal: Money,
    pub cbs_rate: Rate,
    pub cbs: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    pub number: u32,
    pub product: ProductLine,
    pub total_tax: Money,
    pub icms: Option<IcmsLine>,
    pub pis: Option<ContributionLine>,
    pub cofins: Option<ContributionLine>,
    pub reform: Option<ReformLine>,
}

/// Document-level reform-regime totalizer (`IBSCBSTot`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReformTotals {
    pub base: Money,
    pub ibs_state: Money,
    pub ibs_municipal: Money,
    pub ibs: Money,
    pub cbs: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentTotals {
    /// `ICMSTot` fields in layout order.
    pub icms: Vec<(&'static str, Money)>,
    pub reform: Option<ReformTotals>,
}

impl DocumentTotals {
    pub fn icms_field(&self, tag: &str) -> Option<Money> {
        self.icms.iter().find(|(t, _)| *t == tag).map(|(_, v)| *v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentDetail {
    pub indicator: i64,
    pub method: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payment {
    pub change: Money,
    pub details: Vec<PaymentDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdditionalInfo {
    pub fiscal: String,
    pub complementary: String,
}

/// Canonical fiscal document produced by the builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalDocument {
    pub key: DocumentKey,
    pub status: DocumentStatus,
    pub identification: Identification,
    pub issuer: Party,
    pub recipient: Party,
    /// Third parties granted read access (`autXML`), digits only.
    pub authorized_readers: Vec<String>,
    pub items: Vec<LineItem>,
    pub totals: DocumentTotals,
    pub freight_mode: i64,
    pub payment: Option<Payment>,
    pub additional_info: Option<AdditionalInfo>,
    pub integration_id: Option<String>,
    /// Fields that were present but not numeric and were read as zero.
    pub coerced_fields: Vec<String>,
}

impl CanonicalDocument {
    /// Move the document along its lifecycle.
    pub fn advance(&mut self, next: DocumentStatus) -> fiscalflow_core::DomainResult<()> {
        self.status = self.status.transition(next)?;
        Ok(())
    }
}
