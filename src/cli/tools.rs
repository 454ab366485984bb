use crate::aggregation::{calculate_gas_savings, AggregatedBlob};
use crate::crypto::{envelope_signer, KeyPair, SIGNATURE_ENVELOPE_LEN};
use crate::error::CustodyResult;

/// Offline helpers: none of these touch the registry
pub fn handle_keygen() {
    let keys = KeyPair::generate();
    println!("Address: {}", keys.address());
    println!("Secret:  {}", keys.secret_hex());
    println!("Keep the secret offline. Anyone holding it can sign as this address.");
}

pub fn handle_gas(count: u64) {
    let est = calculate_gas_savings(count);
    println!("Operations:      {}", est.operation_count);
    println!("Naive gas:       {}", est.naive_gas);
    println!("Aggregated gas:  {}", est.aggregated_gas);
    println!(
        "Savings:         {} ({}.{:02}%)",
        est.savings,
        est.savings_bps / 100,
        est.savings_bps % 100
    );
}

pub fn handle_decode_blob(blob: &str) -> CustodyResult<()> {
    let decoded = AggregatedBlob::from_hex(blob)?;
    println!("Master:    {}", decoded.master);
    println!("Nonce:     {}", decoded.nonce);
    println!("Sig bytes: {}", decoded.signature.len());
    match envelope_signer(&decoded.signature) {
        Some(signer) if signer == decoded.master => println!("Mode:      master"),
        Some(signer) => println!("Mode:      session key {}", signer),
        None => println!(
            "Mode:      unknown (envelope must be {} bytes)",
            SIGNATURE_ENVELOPE_LEN
        ),
    }
    Ok(())
}
