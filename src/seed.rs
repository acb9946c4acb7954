//! Sample vendor directory for trying the tool out.

use tracing::info;

use crate::error::DatabaseError;
use crate::model::Vendor;
use crate::store::Database;

/// (company, email, phone, specialization, address)
const SAMPLE_VENDORS: &[(&str, &str, &str, &str, &str)] = &[
    (
        "Tech Solutions Ltd",
        "contact@techsolutions.com",
        "+1-555-0101",
        "IT Equipment & Software",
        "123 Tech Street, San Francisco, CA 94102",
    ),
    (
        "Office Supplies Co",
        "sales@officesupplies.com",
        "+1-555-0202",
        "Office Furniture & Supplies",
        "456 Business Ave, New York, NY 10001",
    ),
    (
        "Global Hardware Inc",
        "info@globalhardware.com",
        "+1-555-0303",
        "Computer Hardware",
        "789 Enterprise Blvd, Austin, TX 78701",
    ),
    (
        "Industrial Equipment Pro",
        "orders@industrialequip.com",
        "+1-555-0404",
        "Industrial & Manufacturing Equipment",
        "321 Factory Lane, Detroit, MI 48201",
    ),
    (
        "Smart Tech Distributors",
        "vendors@smarttech.com",
        "+1-555-0505",
        "Electronics & Smart Devices",
        "555 Innovation Dr, Seattle, WA 98101",
    ),
];

/// The sample vendors as records.
pub fn sample_vendors() -> Vec<Vendor> {
    SAMPLE_VENDORS
        .iter()
        .map(|(company, email, phone, specialization, address)| {
            Vendor::new(*company, *email, *company)
                .with_phone(*phone)
                .with_specialization(*specialization)
                .with_address(*address)
        })
        .collect()
}

/// Insert any sample vendor whose email is not yet present.
/// Returns how many were added.
pub async fn seed_vendors(db: &dyn Database) -> Result<usize, DatabaseError> {
    let mut added = 0;
    for vendor in sample_vendors() {
        if db.find_vendor_by_email(&vendor.email).await?.is_some() {
            continue;
        }
        db.insert_vendor(&vendor).await?;
        added += 1;
    }
    info!(added, "Sample vendors seeded");
    Ok(added)
}
