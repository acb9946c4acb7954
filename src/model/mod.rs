//! Domain records: vendors, RFPs and proposals.

mod lenient;
pub mod proposal;
pub mod rfp;
pub mod vendor;

pub use proposal::{
    AttachmentMeta, LineItem, OfferedTimeline, Pricing, Proposal, ProposalStatus, clamp_score,
};
pub use rfp::{Budget, Dispatch, Requirement, Rfp, RfpStatus, Timeline, TimelineUnit};
pub use vendor::{Vendor, VendorStatus};

pub(crate) use lenient::{
    opt_decimal as lenient_opt_decimal, opt_f64 as lenient_opt_f64, opt_u32 as lenient_opt_u32,
};

/// Default currency when the model or the user leaves it out.
pub const DEFAULT_CURRENCY: &str = "USD";

pub(crate) fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
