//! Default custom-vocabulary phrase list
//!
//! Conference and cloud-infrastructure terms the recognizer tends to mangle.
//! Offered as a seed for the phrase list grammar; users can extend or replace
//! it in their settings.

use once_cell::sync::Lazy;

pub static DEFAULT_PHRASES: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "Azure",
        "Azure OpenAI",
        "Azure Monitor",
        "Azure Arc",
        "Azure DevOps",
        "Microsoft Entra ID",
        "Microsoft Fabric",
        "Microsoft Sentinel",
        "Microsoft Defender",
        "Kubernetes",
        "AKS",
        "Docker",
        "containerization",
        "DevOps",
        "GitOps",
        "CI/CD",
        "GitHub",
        "GitHub Actions",
        "Copilot",
        "GitHub Copilot",
        "Terraform",
        "Bicep",
        "ARM templates",
        "Infrastructure as Code",
        "PowerShell",
        "Power Platform",
        "Power BI",
        "Power Automate",
        "Logic Apps",
        "Functions",
        "serverless",
        "microservices",
        "API Management",
        "Service Bus",
        "Event Grid",
        "Event Hubs",
        "Cosmos DB",
        "SQL Server",
        "PostgreSQL",
        "Redis",
        "blob storage",
        "virtual network",
        "ExpressRoute",
        "load balancer",
        "Front Door",
        "Zero Trust",
        "identity and access management",
        "multi-factor authentication",
        "single sign-on",
        "OAuth",
        "OpenID Connect",
        "observability",
        "telemetry",
        "OpenTelemetry",
        "Prometheus",
        "Grafana",
        "machine learning",
        "large language model",
        "retrieval-augmented generation",
        "prompt engineering",
        "semantic kernel",
        "vector database",
        "hybrid cloud",
        "landing zone",
        "well-architected framework",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
});
