use crate::cert::Certificate;
use crate::error::{PkiError, Result};

const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Convert DER‑encoded data into a PEM‑encoded string with the provided label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let pem = pem::Pem::new(label, der);
    pem::encode_config(
        &pem,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

/// Concatenates certificates into one PEM bundle, preserving order.
pub fn join_certificates(chain: &[Certificate]) -> Result<String> {
    let mut bundle = String::new();
    for cert in chain {
        bundle.push_str(&der_to_pem(&cert.to_der()?, CERTIFICATE_LABEL));
    }
    Ok(bundle)
}

/// Splits a PEM bundle back into certificates. Blocks with other labels are skipped.
pub fn split_certificates(bundle: &str) -> Result<Vec<Certificate>> {
    let blocks = pem::parse_many(bundle).map_err(|e| PkiError::DecodingError(e.to_string()))?;
    let chain = blocks
        .iter()
        .filter(|block| block.tag() == CERTIFICATE_LABEL)
        .map(|block| Certificate::from_der(block.contents()))
        .collect::<Result<Vec<_>>>()?;
    if chain.is_empty() {
        return Err(PkiError::DecodingError(
            "bundle contains no certificates".to_string(),
        ));
    }
    Ok(chain)
}
