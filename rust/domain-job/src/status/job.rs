//! Persisted form of a job record.
//!
//! ```xml
//! <domstatus name="vm1">
//!   <job type="destroy" async="migration out" phase="perform3" flags="0x1"/>
//! </domstatus>
//! ```
//!
//! Only tracked primary kinds are written. The element is omitted entirely
//! when neither a tracked primary job nor an async job is active.

use crate::error::{JobError, JobResult};
use crate::kinds::{AsyncJobKind, JobKind};
use crate::record::JobRecord;

use super::StatusElement;

pub const STATUS_ROOT: &str = "domstatus";
pub const JOB_ELEMENT: &str = "job";

/// Builds the `<job>` element, or `None` if there is nothing to persist.
pub fn format_job(record: &JobRecord) -> JobResult<Option<StatusElement>> {
    let job = if record.active().is_tracked() {
        record.active()
    } else {
        JobKind::None
    };
    let async_job = record.async_job();

    if job == JobKind::None && async_job == AsyncJobKind::None {
        return Ok(None);
    }

    let mut element = StatusElement::new(JOB_ELEMENT)
        .with_attr("type", job.as_str())
        .with_attr("async", async_job.as_str());

    if record.phase() != 0 {
        element.set_attr("phase", async_job.phase_name(record.phase()));
    }

    if async_job != AsyncJobKind::None {
        element.set_attr("flags", format!("0x{:x}", record.api_flags()));
    }

    record.payload().format(&mut element.children)?;

    Ok(Some(element))
}

/// Loads the `<job>` child of `parent` into `record`.
///
/// A missing element leaves the record untouched.
pub fn parse_job(record: &mut JobRecord, parent: &StatusElement) -> JobResult<()> {
    let Some(element) = parent.child(JOB_ELEMENT) else {
        return Ok(());
    };

    if let Some(name) = non_empty_attr(element, "type") {
        let kind = JobKind::from_name(name)
            .ok_or_else(|| JobError::corrupt(format!("Unknown job type {name}")))?;
        record.active = kind;
    }

    if let Some(name) = non_empty_attr(element, "async") {
        let async_job = AsyncJobKind::from_name(name)
            .ok_or_else(|| JobError::corrupt(format!("Unknown async job type {name}")))?;
        record.async_job = async_job;

        if let Some(phase) = non_empty_attr(element, "phase") {
            record.phase = async_job
                .phase_from_name(phase)
                .ok_or_else(|| JobError::corrupt(format!("Unknown job phase {phase}")))?;
        }
    }

    if let Some(flags) = non_empty_attr(element, "flags") {
        record.api_flags = parse_hex(flags)
            .ok_or_else(|| JobError::corrupt(format!("Invalid job flags {flags}")))?;
    }

    record.payload_mut().parse(element)
}

/// Renders the full status document for a domain.
pub fn format_status(name: &str, record: &JobRecord) -> JobResult<String> {
    let mut root = StatusElement::new(STATUS_ROOT).with_attr("name", name);
    if let Some(job) = format_job(record)? {
        root.children.push(job);
    }
    root.to_xml_string()
}

/// Parses a status document into `record`, returning the domain name.
pub fn parse_status(xml: &str, record: &mut JobRecord) -> JobResult<String> {
    let root = StatusElement::parse(xml)?;
    if root.name != STATUS_ROOT {
        return Err(JobError::corrupt(format!(
            "unexpected root element <{}> in status document",
            root.name
        )));
    }
    parse_job(record, &root)?;
    Ok(root.attr("name").unwrap_or_default().to_string())
}

fn non_empty_attr<'a>(element: &'a StatusElement, key: &str) -> Option<&'a str> {
    element.attr(key).filter(|value| !value.is_empty())
}

fn parse_hex(value: &str) -> Option<u64> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u64::from_str_radix(digits, 16).ok()
}
