//! XML rendering of the (unsigned) generated document.

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::document::{Address, CanonicalDocument, ContributionLine, LineItem, Party};

pub const NAMESPACE: &str = "http://www.portalfiscal.inf.br/nfe";
pub const LAYOUT_VERSION: &str = "4.00";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("xml rendering failed: {0}")]
pub struct XmlError(pub String);

type XmlResult = Result<(), XmlError>;

struct Out {
    w: Writer<Vec<u8>>,
}

impl Out {
    fn event(&mut self, e: Event<'_>) -> XmlResult {
        self.w.write_event(e).map_err(|e| XmlError(e.to_string()))
    }

    fn open(&mut self, tag: &str) -> XmlResult {
        self.event(Event::Start(BytesStart::new(tag)))
    }

    fn open_with(&mut self, tag: &str, attrs: &[(&str, &str)]) -> XmlResult {
        let mut start = BytesStart::new(tag);
        for attr in attrs {
            start.push_attribute(*attr);
        }
        self.event(Event::Start(start))
    }

    fn close(&mut self, tag: &str) -> XmlResult {
        self.event(Event::End(BytesEnd::new(tag)))
    }

    fn leaf(&mut self, tag: &str, value: impl ToString) -> XmlResult {
        self.open(tag)?;
        self.event(Event::Text(BytesText::new(&value.to_string())))?;
        self.close(tag)
    }

    /// Skip empty strings: optional layout fields must be absent, not blank.
    fn opt_leaf(&mut self, tag: &str, value: &str) -> XmlResult {
        if value.is_empty() { Ok(()) } else { self.leaf(tag, value) }
    }
}

/// Render the canonical document as an unsigned `NFe` XML string.
pub fn render_document(doc: &CanonicalDocument) -> Result<String, XmlError> {
    let mut out = Out {
        w: Writer::new(Vec::new()),
    };
    out.event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    out.open_with("NFe", &[("xmlns", NAMESPACE)])?;
    let id = format!("NFe{}", doc.key);
    out.open_with("infNFe", &[("versao", LAYOUT_VERSION), ("Id", &id)])?;

    identification(&mut out, doc)?;
    issuer(&mut out, &doc.issuer)?;
    recipient(&mut out, &doc.recipient)?;
    for reader in &doc.authorized_readers {
        out.open("autXML")?;
        out.leaf(if reader.len() == 11 { "CPF" } else { "CNPJ" }, reader)?;
        out.close("autXML")?;
    }
    for item in &doc.items {
        line_item(&mut out, item)?;
    }
    totals(&mut out, doc)?;

    out.open("transp")?;
    out.leaf("modFrete", doc.freight_mode)?;
    out.close("transp")?;

    if let Some(pag) = &doc.payment {
        out.open("pag")?;
        for d in &pag.details {
            out.open("detPag")?;
            out.leaf("indPag", d.indicator)?;
            out.leaf("tPag", &d.method)?;
            out.leaf("vPag", d.amount)?;
            out.close("detPag")?;
        }
        if !pag.change.is_zero() {
            out.leaf("vTroco", pag.change)?;
        }
        out.close("pag")?;
    }

    if let Some(info) = &doc.additional_info {
        out.open("infAdic")?;
        out.opt_leaf("infAdFisco", &info.fiscal)?;
        out.opt_leaf("infCpl", &info.complementary)?;
        out.close("infAdic")?;
    }

    out.close("infNFe")?;
    out.close("NFe")?;
    String::from_utf8(out.w.into_inner()).map_err(|e| XmlError(e.to_string()))
}

fn identification(out: &mut Out, doc: &CanonicalDocument) -> XmlResult {
    let ide = &doc.identification;
    let key = doc.key.as_str();
    out.open("ide")?;
    out.leaf("cUF", ide.jurisdiction_code)?;
    out.leaf("cNF", format!("{:08}", ide.numeric_code))?;
    out.leaf("natOp", &ide.nature)?;
    out.leaf("mod", ide.model)?;
    out.leaf("serie", ide.series)?;
    out.leaf("nNF", ide.number)?;
    out.leaf("dhEmi", &ide.issued_at)?;
    out.leaf("tpNF", ide.operation_type)?;
    out.leaf("idDest", ide.destination)?;
    out.leaf("cMunFG", ide.municipality)?;
    out.leaf("tpImp", ide.print_format)?;
    out.leaf("tpEmis", ide.emission_type)?;
    out.leaf("cDV", &key[key.len() - 1..])?;
    out.leaf("tpAmb", ide.environment)?;
    out.leaf("finNFe", ide.purpose)?;
    out.leaf("indFinal", ide.final_consumer)?;
    out.leaf("indPres", ide.presence)?;
    out.leaf("procEmi", ide.emission_process)?;
    out.leaf("verProc", &ide.process_version)?;
    out.close("ide")
}

fn tax_id(out: &mut Out, party: &Party) -> XmlResult {
    match (&party.cnpj, &party.cpf) {
        (Some(cnpj), _) => out.leaf("CNPJ", cnpj),
        (None, Some(cpf)) => out.leaf("CPF", cpf),
        (None, None) => Ok(()),
    }
}

fn address(out: &mut Out, tag: &str, a: &Address) -> XmlResult {
    out.open(tag)?;
    out.leaf("xLgr", &a.street)?;
    out.leaf("nro", &a.number)?;
    out.opt_leaf("xCpl", &a.complement)?;
    out.leaf("xBairro", &a.district)?;
    out.leaf("cMun", a.municipality_code)?;
    out.leaf("xMun", &a.municipality)?;
    out.leaf("UF", &a.state)?;
    out.opt_leaf("CEP", &a.postal_code)?;
    out.leaf("cPais", a.country_code)?;
    out.leaf("xPais", &a.country)?;
    out.opt_leaf("fone", &a.phone)?;
    out.close(tag)
}

fn issuer(out: &mut Out, p: &Party) -> XmlResult {
    out.open("emit")?;
    tax_id(out, p)?;
    out.leaf("xNome", &p.name)?;
    out.opt_leaf("xFant", &p.trade_name)?;
    address(out, "enderEmit", &p.address)?;
    out.leaf("IE", &p.state_registration)?;
    out.opt_leaf("IM", &p.municipal_registration)?;
    out.opt_leaf("CNAE", &p.activity_code)?;
    out.leaf("CRT", p.regime)?;
    out.close("emit")
}

fn recipient(out: &mut Out, p: &Party) -> XmlResult {
    out.open("dest")?;
    tax_id(out, p)?;
    out.leaf("xNome", &p.name)?;
    address(out, "enderDest", &p.address)?;
    out.leaf("indIEDest", p.regime)?;
    out.opt_leaf("IE", &p.state_registration)?;
    out.opt_leaf("email", &p.email)?;
    out.close("dest")
}

fn line_item(out: &mut Out, item: &LineItem) -> XmlResult {
    let p = &item.product;
    let n = item.number.to_string();
    out.open_with("det", &[("nItem", &n)])?;

    out.open("prod")?;
    out.leaf("cProd", &p.code)?;
    out.leaf("cEAN", &p.ean)?;
    out.leaf("xProd", &p.description)?;
    out.leaf("NCM", &p.ncm)?;
    out.leaf("CFOP", &p.cfop)?;
    out.leaf("uCom", &p.unit)?;
    out.leaf("qCom", p.quantity)?;
    out.leaf("vUnCom", p.unit_value)?;
    out.leaf("vProd", p.gross)?;
    out.leaf("cEANTrib", &p.ean_taxable)?;
    out.leaf("uTrib", &p.unit_taxable)?;
    out.leaf("qTrib", p.quantity_taxable)?;
    out.leaf("vUnTrib", p.unit_value_taxable)?;
    for (tag, v) in [
        ("vFrete", p.freight),
        ("vSeg", p.insurance),
        ("vDesc", p.discount),
        ("vOutro", p.other),
    ] {
        if v.is_positive() {
            out.leaf(tag, v)?;
        }
    }
    out.leaf("indTot", p.in_total)?;
    out.close("prod")?;

    out.open("imposto")?;
    out.leaf("vTotTrib", item.total_tax)?;
    if let Some(icms) = &item.icms {
        let group = format!("ICMS{}", icms.cst);
        out.open("ICMS")?;
        out.open(&group)?;
        out.leaf("orig", icms.origin)?;
        out.leaf("CST", &icms.cst)?;
        out.leaf("modBC", icms.base_mode)?;
        out.leaf("vBC", icms.base)?;
        out.leaf("pICMS", icms.rate)?;
        out.leaf("vICMS", icms.value)?;
        out.close(&group)?;
        out.close("ICMS")?;
    }
    if let Some(pis) = &item.pis {
        contribution(out, "PIS", "pPIS", "vPIS", pis)?;
    }
    if let Some(cofins) = &item.cofins {
        contribution(out, "COFINS", "pCOFINS", "vCOFINS", cofins)?;
    }
    if let Some(r) = &item.reform {
        out.open("IBSCBS")?;
        out.leaf("CST", &r.cst)?;
        out.leaf("cClassTrib", &r.class_code)?;
        out.open("gIBSCBS")?;
        out.leaf("vBC", r.base)?;
        out.open("gIBSUF")?;
        out.leaf("pIBSUF", r.ibs_state_rate)?;
        out.leaf("vIBSUF", r.ibs_state)?;
        out.close("gIBSUF")?;
        out.open("gIBSMun")?;
        out.leaf("pIBSMun", r.ibs_municipal_rate)?;
        out.leaf("vIBSMun", r.ibs_municipal)?;
        out.close("gIBSMun")?;
        out.leaf("vIBS", r.ibs_state + r.ibs_municipal)?;
        out.open("gCBS")?;
        out.leaf("pCBS", r.cbs_rate)?;
        out.leaf("vCBS", r.cbs)?;
        out.close("gCBS")?;
        out.close("gIBSCBS")?;
        out.close("IBSCBS")?;
    }
    out.close("imposto")?;
    out.close("det")
}

fn contribution(out: &mut Out, tag: &str, rate_tag: &str, value_tag: &str, c: &ContributionLine) -> XmlResult {
    let group = format!("{tag}Aliq");
    out.open(tag)?;
    out.open(&group)?;
    out.leaf("CST", &c.cst)?;
    out.leaf("vBC", c.base)?;
    out.leaf(rate_tag, c.rate)?;
    out.leaf(value_tag, c.value)?;
    out.close(&group)?;
    out.close(tag)
}

fn totals(out: &mut Out, doc: &CanonicalDocument) -> XmlResult {
    out.open("total")?;
    out.open("ICMSTot")?;
    for (tag, value) in &doc.totals.icms {
        out.leaf(tag, value)?;
    }
    out.close("ICMSTot")?;
    if let Some(t) = &doc.totals.reform {
        out.open("IBSCBSTot")?;
        out.leaf("vBCIBSCBS", t.base)?;
        out.open("gIBS")?;
        out.open("gIBSUF")?;
        out.leaf("vIBSUF", t.ibs_state)?;
        out.close("gIBSUF")?;
        out.open("gIBSMun")?;
        out.leaf("vIBSMun", t.ibs_municipal)?;
        out.close("gIBSMun")?;
        out.leaf("vIBS", t.ibs)?;
        out.close("gIBS")?;
        out.open("gCBS")?;
        out.leaf("vCBS", t.cbs)?;
        out.close("gCBS")?;
        out.close("IBSCBSTot")?;
    }
    out.close("total")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DocumentBuilder;
    use crate::request::DocumentRequest;
    use serde_json::json;

    fn doc() -> CanonicalDocument {
        let req = DocumentRequest::from_value(json!({
            "ide": {"cUF": 29, "cNF": "00000001", "natOp": "VENDA & CIA", "mod": 55, "serie": 1,
                    "nNF": 7, "dhEmi": "2025-03-01T08:00:00-03:00"},
            "emit": {"CNPJ": "41986662000160", "xNome": "EMIT", "IE": "1", "CRT": 3},
            "dest": {"CPF": "12345678909", "xNome": "FULANO", "indIEDest": 9},
            "itens": [{"nItem": 1, "prod": {"cProd": "1", "xProd": "X", "qCom": 1, "vUnCom": 10, "vProd": 10},
                       "imposto": {"IBSCBS": {"vBC": 10, "gIBSUF": {"vIBSUF": 0.1}, "gCBS": {"vCBS": 0.9}}}}],
            "totais": {"ICMSTot": {"vProd": 10, "vNF": 10}}
        }))
        .unwrap();
        DocumentBuilder::default().build(&req).unwrap()
    }

    #[test]
    fn renders_identifying_attributes_and_escapes_text() {
        let d = doc();
        let xml = render_document(&d).unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(&format!("Id=\"NFe{}\"", d.key)));
        assert!(xml.contains("<natOp>VENDA &amp; CIA</natOp>"));
        assert!(xml.contains("<CPF>12345678909</CPF>"));
        assert!(xml.contains("<autXML><CNPJ>13937073000156</CNPJ></autXML>"));
    }

    #[test]
    fn renders_recomputed_reform_totals() {
        let xml = render_document(&doc()).unwrap();
        assert!(xml.contains("<vBCIBSCBS>10.00</vBCIBSCBS>"));
        assert!(xml.contains("<vCBS>0.90</vCBS>"));
        assert!(xml.contains("<vProd>10.00</vProd>"));
        assert!(xml.contains("<modFrete>9</modFrete>"));
    }
}
