//! # Core Traits
//!
//! Capability interface over the stored object shapes.
//!
//! Each schema version adapts its object types to [`DataObject`] once, at the
//! boundary where the object enters the store, so the lifecycle code never has to
//! probe for concrete types.

use crate::types::{CommonMetadata, ContainerStatus, EtpUri, ObjectHeader};

/// Identity and metadata access shared by every stored object
pub trait DataObject {
    /// URI of the object itself
    fn id(&self) -> &EtpUri;

    /// URI of the containing object, if the object has one
    fn container_id(&self) -> Option<&EtpUri>;

    fn common_metadata(&self) -> &CommonMetadata;

    fn common_metadata_mut(&mut self) -> &mut CommonMetadata;

    /// Stamp the last-change time
    fn touch(&mut self) {
        self.common_metadata_mut().date_time_last_change = chrono::Utc::now();
    }
}

impl DataObject for ObjectHeader {
    fn id(&self) -> &EtpUri {
        &self.uri
    }

    fn container_id(&self) -> Option<&EtpUri> {
        self.container_uri.as_ref()
    }

    fn common_metadata(&self) -> &CommonMetadata {
        &self.metadata
    }

    fn common_metadata_mut(&mut self) -> &mut CommonMetadata {
        &mut self.metadata
    }
}

impl DataObject for ContainerStatus {
    fn id(&self) -> &EtpUri {
        &self.uri
    }

    fn container_id(&self) -> Option<&EtpUri> {
        None
    }

    fn common_metadata(&self) -> &CommonMetadata {
        &self.metadata
    }

    fn common_metadata_mut(&mut self) -> &mut CommonMetadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_capabilities() {
        let uri = EtpUri::parse("eml://witsml14/well(w1)/wellbore(b1)/log(l1)").unwrap();
        let mut header = ObjectHeader::new(uri.clone(), "Gamma Ray");
        assert_eq!(header.id(), &uri);
        assert_eq!(
            header.container_id().map(|u| u.as_str()),
            Some("eml://witsml14/well(w1)/wellbore(b1)")
        );

        let before = header.common_metadata().date_time_last_change;
        header.touch();
        assert!(header.common_metadata().date_time_last_change >= before);
        assert_eq!(header.common_metadata().name, "Gamma Ray");
    }
}
