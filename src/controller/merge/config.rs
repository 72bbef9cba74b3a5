//! Typed merge of component configuration files
//!
//! The compiled-in default configuration is the existing side; the overrides from
//! the operator manifest are the required side.

use crate::crd::{
    ApiServerConfig, ClusterInfo, ConsoleConfig, ExtensionsConfig, LoggingConfig, ServingInfo,
};

use super::{merge_map, set_if_set};

/// Field-selective merge of a configuration struct
pub trait MergeFrom {
    fn merge_from(&mut self, modified: &mut bool, required: &Self);
}

/// Merge a nested optional section, creating it when only required has it
fn merge_section<T>(modified: &mut bool, existing: &mut Option<T>, required: &Option<T>)
where
    T: MergeFrom + Clone,
{
    let Some(required) = required else {
        return;
    };
    match existing {
        Some(existing) => existing.merge_from(modified, required),
        None => {
            *existing = Some(required.clone());
            *modified = true;
        }
    }
}

impl MergeFrom for ServingInfo {
    fn merge_from(&mut self, modified: &mut bool, required: &Self) {
        set_if_set(modified, &mut self.bind_address, &required.bind_address);
        set_if_set(modified, &mut self.cert_file, &required.cert_file);
        set_if_set(modified, &mut self.key_file, &required.key_file);
        set_if_set(modified, &mut self.client_ca, &required.client_ca);
        set_if_set(
            modified,
            &mut self.max_requests_in_flight,
            &required.max_requests_in_flight,
        );
        // certificate lists are replaced whole
        set_if_set(
            modified,
            &mut self.named_certificates,
            &required.named_certificates,
        );
    }
}

impl MergeFrom for ClusterInfo {
    fn merge_from(&mut self, modified: &mut bool, required: &Self) {
        set_if_set(
            modified,
            &mut self.console_public_url,
            &required.console_public_url,
        );
        set_if_set(
            modified,
            &mut self.master_public_url,
            &required.master_public_url,
        );
        set_if_set(
            modified,
            &mut self.logout_public_url,
            &required.logout_public_url,
        );
        set_if_set(
            modified,
            &mut self.metrics_public_url,
            &required.metrics_public_url,
        );
        set_if_set(
            modified,
            &mut self.logging_public_url,
            &required.logging_public_url,
        );
    }
}

impl MergeFrom for ExtensionsConfig {
    fn merge_from(&mut self, modified: &mut bool, required: &Self) {
        set_if_set(modified, &mut self.script_urls, &required.script_urls);
        set_if_set(
            modified,
            &mut self.stylesheet_urls,
            &required.stylesheet_urls,
        );
        merge_map(modified, &mut self.properties, &required.properties);
    }
}

impl MergeFrom for ConsoleConfig {
    fn merge_from(&mut self, modified: &mut bool, required: &Self) {
        set_if_set(modified, &mut self.log_level, &required.log_level);
        merge_section(modified, &mut self.serving_info, &required.serving_info);
        merge_section(modified, &mut self.cluster_info, &required.cluster_info);
        merge_map(modified, &mut self.features, &required.features);
        merge_section(modified, &mut self.extensions, &required.extensions);
    }
}

impl MergeFrom for ApiServerConfig {
    fn merge_from(&mut self, modified: &mut bool, required: &Self) {
        set_if_set(modified, &mut self.log_level, &required.log_level);
        merge_section(modified, &mut self.serving_info, &required.serving_info);
        set_if_set(
            modified,
            &mut self.cors_allowed_origins,
            &required.cors_allowed_origins,
        );
        set_if_set(modified, &mut self.audit_enabled, &required.audit_enabled);
    }
}

impl MergeFrom for LoggingConfig {
    fn merge_from(&mut self, modified: &mut bool, required: &Self) {
        set_if_set(modified, &mut self.level, &required.level);
    }
}
