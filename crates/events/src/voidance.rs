use serde::Serialize;

use fiscalflow_core::id::only_digits;

use crate::event::RangeVoidance;

/// Identifier of a range voidance (`idInut`):
/// `"ID" + cUF(2) + year(2) + CNPJ(14) + mod(2) + serie(3) + start(9) + end(9)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct VoidanceId(String);

impl VoidanceId {
    pub fn new(jurisdiction_code: u8, issuer_cnpj: &str, model: u8, v: &RangeVoidance) -> Self {
        Self(format!(
            "ID{:02}{:02}{:0>14}{:02}{:03}{:09}{:09}",
            jurisdiction_code,
            v.year,
            only_digits(issuer_cnpj),
            model,
            v.series,
            v.start,
            v.end,
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for VoidanceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventRequest, FiscalEvent};

    #[test]
    fn voidance_id_layout() {
        let req = EventRequest::RangeVoidance {
            year: Some(25),
            series: 1,
            start: 10,
            end: 12,
            justification: None,
        };
        let FiscalEvent::RangeVoidance(v) = req.validate().unwrap() else {
            panic!("expected voidance");
        };
        let id = VoidanceId::new(29, "41.986.662/0001-60", 55, &v);
        assert_eq!(id.as_str(), "ID29254198666200016055001000000010000000012");
        assert_eq!(id.as_str().len(), 43);
    }
}
