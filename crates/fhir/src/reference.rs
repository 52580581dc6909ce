//! Reference and canonical-URL helpers.
//!
//! Responsibilities:
//! - Split relative references (`Patient/123`) into resource type and id
//! - Decide whether an absolute reference or canonical URL points at this server
//! - Build relative references and canonical URLs for resources held here
//!
//! Notes:
//! - Locality is decided by comparing URL hosts with [`ServerEndpoints::local_host`].
//!   The endpoints are resolved once at startup and only ever read here.

use crate::datatypes::Reference;
use crate::primitive::{CanonicalValue, StringValue, UriValue};
use url::Url;

/// The server addresses the reference helpers need.
pub trait ServerEndpoints: Send + Sync {
    /// Base URL of the FHIR API, ending in `/`.
    fn fhir_base_url(&self) -> &Url;

    /// Host name that identifies resources held on this server.
    fn local_host(&self) -> Option<&str>;
}

/// `ResourceType/id` split into its parts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedReference {
    pub resource_type: Option<String>,
    pub id: Option<String>,
}

/// A reference string resolved against this server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedReference {
    pub is_local: bool,
    pub resource_type: Option<String>,
    pub id: Option<String>,
}

/// A canonical URL resolved against this server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedCanonical {
    pub is_local: bool,
    pub is_valid: bool,
    /// The resource type, or the root-level element name when the URL does not end in
    /// `Type/id`.
    pub resource_type: Option<String>,
    pub id: Option<String>,
}

/// Split a relative reference on `/`.
///
/// The first segment is the resource type and the second the id; anything after the id
/// (`/_history/2`) is ignored. A string without `/` yields neither part. The type is not
/// checked against the known resource types.
pub fn parse_reference(text: &str) -> ParsedReference {
    let Some((resource_type, rest)) = text.trim().split_once('/') else {
        return ParsedReference::default();
    };
    let id = rest.split('/').next().unwrap_or_default();
    ParsedReference {
        resource_type: non_empty(resource_type),
        id: non_empty(id),
    }
}

/// Resolve a relative or absolute reference string.
///
/// # Arguments
///
/// * `text` - `Patient/123`, `Patient/123/_history/2` or `https://host/fhir/Patient/123`
/// * `endpoints` - local server addresses
///
/// # Returns
///
/// Relative references are always local. Absolute URLs are local when their host is the
/// local host. Type and id are the last two path segments once any `_history` suffix is
/// removed; with fewer than two segments both are `None`.
pub fn resolve_reference(text: &str, endpoints: &dyn ServerEndpoints) -> ResolvedReference {
    let text = text.trim();
    if text.is_empty() {
        return ResolvedReference::default();
    }

    let (is_local, segments): (bool, Vec<String>) = match Url::parse(text) {
        Ok(url) => {
            let is_local = match (url.host_str(), endpoints.local_host()) {
                (Some(host), Some(local)) => host.eq_ignore_ascii_case(local),
                _ => false,
            };
            (is_local, path_segments(&url))
        }
        Err(_) => (
            true,
            text.split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        ),
    };

    let segments = match segments.iter().position(|segment| segment == "_history") {
        Some(at) => &segments[..at],
        None => &segments[..],
    };
    let (resource_type, id) = match segments {
        [.., resource_type, id] => (Some(resource_type.clone()), Some(id.clone())),
        _ => (None, None),
    };

    ResolvedReference {
        is_local,
        resource_type,
        id,
    }
}

/// Parse a canonical URL such as `https://host/fhir/Questionnaire/abc|1.0`.
///
/// Empty and unparsable input is invalid. When the second-to-last path segment names a
/// known resource type the URL resolves to that type and id; otherwise the last segment
/// is taken as a root-level element name with no id.
pub fn parse_canonical_url(url: &str, endpoints: &dyn ServerEndpoints) -> ParsedCanonical {
    let url = url.trim();
    let unversioned = url.split_once('|').map_or(url, |(base, _)| base);
    if unversioned.is_empty() {
        return ParsedCanonical::default();
    }
    let Ok(parsed) = Url::parse(unversioned) else {
        return ParsedCanonical::default();
    };

    let is_local = match (parsed.host_str(), endpoints.local_host()) {
        (Some(host), Some(local)) => host.eq_ignore_ascii_case(local),
        _ => false,
    };

    let segments = path_segments(&parsed);
    let (resource_type, id) = match segments.as_slice() {
        [.., resource_type, id] if is_known_resource_type(resource_type) => {
            (Some(resource_type.clone()), Some(id.clone()))
        }
        [.., last] => (Some(last.clone()), None),
        [] => (None, None),
    };

    ParsedCanonical {
        is_local,
        is_valid: true,
        resource_type,
        id,
    }
}

/// Build `{type}/{id}` as a [`Reference`], with `display` set only when non-empty.
pub fn build_relative_reference(resource_type: &str, id: &str, display: Option<&str>) -> Reference {
    Reference {
        reference: Some(StringValue::wrap(format!("{resource_type}/{id}"))),
        resource_type: Some(UriValue::wrap(resource_type)),
        identifier: None,
        display: display
            .filter(|display| !display.trim().is_empty())
            .map(StringValue::wrap),
    }
}

/// Build the canonical URL of a resource held on this server.
pub fn build_canonical_url(
    resource_type: &str,
    id: &str,
    endpoints: &dyn ServerEndpoints,
) -> CanonicalValue {
    let base = endpoints.fhir_base_url().as_str();
    let url = if base.ends_with('/') {
        format!("{base}{resource_type}/{id}")
    } else {
        format!("{base}/{resource_type}/{id}")
    };
    CanonicalValue::wrap(url)
}

/// Whether `name` is a FHIR R4 resource type.
pub fn is_known_resource_type(name: &str) -> bool {
    R4_RESOURCE_TYPES.binary_search(&name).is_ok()
}

fn path_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// FHIR R4 resource types, sorted.
const R4_RESOURCE_TYPES: &[&str] = &[
    "Account",
    "ActivityDefinition",
    "AdverseEvent",
    "AllergyIntolerance",
    "Appointment",
    "AppointmentResponse",
    "AuditEvent",
    "Basic",
    "Binary",
    "BiologicallyDerivedProduct",
    "BodyStructure",
    "Bundle",
    "CapabilityStatement",
    "CarePlan",
    "CareTeam",
    "CatalogEntry",
    "ChargeItem",
    "ChargeItemDefinition",
    "Claim",
    "ClaimResponse",
    "ClinicalImpression",
    "CodeSystem",
    "Communication",
    "CommunicationRequest",
    "CompartmentDefinition",
    "Composition",
    "ConceptMap",
    "Condition",
    "Consent",
    "Contract",
    "Coverage",
    "CoverageEligibilityRequest",
    "CoverageEligibilityResponse",
    "DetectedIssue",
    "Device",
    "DeviceDefinition",
    "DeviceMetric",
    "DeviceRequest",
    "DeviceUseStatement",
    "DiagnosticReport",
    "DocumentManifest",
    "DocumentReference",
    "EffectEvidenceSynthesis",
    "Encounter",
    "Endpoint",
    "EnrollmentRequest",
    "EnrollmentResponse",
    "EpisodeOfCare",
    "EventDefinition",
    "Evidence",
    "EvidenceVariable",
    "ExampleScenario",
    "ExplanationOfBenefit",
    "FamilyMemberHistory",
    "Flag",
    "Goal",
    "GraphDefinition",
    "Group",
    "GuidanceResponse",
    "HealthcareService",
    "ImagingStudy",
    "Immunization",
    "ImmunizationEvaluation",
    "ImmunizationRecommendation",
    "ImplementationGuide",
    "InsurancePlan",
    "Invoice",
    "Library",
    "Linkage",
    "List",
    "Location",
    "Measure",
    "MeasureReport",
    "Media",
    "Medication",
    "MedicationAdministration",
    "MedicationDispense",
    "MedicationKnowledge",
    "MedicationRequest",
    "MedicationStatement",
    "MedicinalProduct",
    "MedicinalProductAuthorization",
    "MedicinalProductContraindication",
    "MedicinalProductIndication",
    "MedicinalProductIngredient",
    "MedicinalProductInteraction",
    "MedicinalProductManufactured",
    "MedicinalProductPackaged",
    "MedicinalProductPharmaceutical",
    "MedicinalProductUndesirableEffect",
    "MessageDefinition",
    "MessageHeader",
    "MolecularSequence",
    "NamingSystem",
    "NutritionOrder",
    "Observation",
    "ObservationDefinition",
    "OperationDefinition",
    "OperationOutcome",
    "Organization",
    "OrganizationAffiliation",
    "Parameters",
    "Patient",
    "PaymentNotice",
    "PaymentReconciliation",
    "Person",
    "PlanDefinition",
    "Practitioner",
    "PractitionerRole",
    "Procedure",
    "Provenance",
    "Questionnaire",
    "QuestionnaireResponse",
    "RelatedPerson",
    "RequestGroup",
    "ResearchDefinition",
    "ResearchElementDefinition",
    "ResearchStudy",
    "ResearchSubject",
    "RiskAssessment",
    "RiskEvidenceSynthesis",
    "Schedule",
    "SearchParameter",
    "ServiceRequest",
    "Slot",
    "Specimen",
    "SpecimenDefinition",
    "StructureDefinition",
    "StructureMap",
    "Subscription",
    "Substance",
    "SubstanceNucleicAcid",
    "SubstancePolymer",
    "SubstanceProtein",
    "SubstanceReferenceInformation",
    "SubstanceSourceMaterial",
    "SubstanceSpecification",
    "SupplyDelivery",
    "SupplyRequest",
    "Task",
    "TerminologyCapabilities",
    "TestReport",
    "TestScript",
    "ValueSet",
    "VerificationResult",
    "VisionPrescription",
];
