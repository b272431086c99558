//! Installed apps as recorded by the app engine.

use chrono::{DateTime, Utc};

use crate::database::AppEngineDb;
use crate::error::{Error, Result};
use crate::projector::{Field, Record};

/// Every installed app joined with its installed version.
const APPS_QUERY: &str = "SELECT * FROM application INNER JOIN applicationversions USING(appId)";

/// An installed app.
///
/// Unless renamed, each field is fed from the column named like the field
/// with its first character in lower case. The `is_*` flags keep the raw
/// integer stored by the app engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct App {
    /// Unique app identifier; column `appId`.
    pub id: String,
    pub title: String,
    pub repository_name: String,
    pub description: String,
    /// Column `webAddress`.
    pub url: String,
    /// Column `icon`.
    pub icon_path: String,
    pub app_status: i64,
    pub company_name: String,
    /// Column `companyWebAddress`.
    pub company_url: String,
    pub is_developer_app_install: i64,
    pub is_visible: i64,
    pub sort_weight: i64,
    /// Column `runasservice`.
    pub run_as_service: bool,
    pub is_updated_on_portal: i64,
    pub user_id: String,
    pub project_id: String,
    /// Column `appOwnerId`.
    pub owner_id: String,
    /// Column `createdDate`.
    pub created: DateTime<Utc>,
    /// Column `modifiedDate`.
    pub modified: DateTime<Utc>,

    /// Semantic version string; column `appVersion`.
    pub version: String,
    /// Identifier of the installed version; column `appVersionId`.
    pub version_id: String,
    pub version_status: i64,
    pub release_notes: String,
    /// Column `composerFilePath`.
    pub composer_filepath: String,
    pub redirect_type: String,
    pub redirect_url: String,
    /// Column `restRedirectUrl`.
    pub rest_redirect_url: String,
    pub redirect_section: String,
    pub to_execute_order: String,
    pub metadata: String,
    pub service_labels: String,
    pub is_secure: i64,
    pub is_swarm_mode_enable: i64,
    pub is_debugging_enabled: i64,
}

impl Record for App {
    const FIELDS: &'static [Field<Self>] = crate::record_fields![App;
        "Id" as "appId" => id,
        "Title" => title,
        "RepositoryName" => repository_name,
        "Description" => description,
        "URL" as "webAddress" => url,
        "IconPath" as "icon" => icon_path,
        "AppStatus" => app_status,
        "CompanyName" => company_name,
        "CompanyURL" as "companyWebAddress" => company_url,
        "IsDeveloperAppInstall" => is_developer_app_install,
        "IsVisible" => is_visible,
        "SortWeight" => sort_weight,
        "RunAsService" as "runasservice" => run_as_service,
        "IsUpdatedOnPortal" => is_updated_on_portal,
        "UserId" => user_id,
        "ProjectId" => project_id,
        "OwnerId" as "appOwnerId" => owner_id,
        "Created" as "createdDate" => created,
        "Modified" as "modifiedDate" => modified,
        "Version" as "appVersion" => version,
        "VersionId" as "appVersionId" => version_id,
        "VersionStatus" => version_status,
        "ReleaseNotes" => release_notes,
        "ComposerFilepath" as "composerFilePath" => composer_filepath,
        "RedirectType" => redirect_type,
        "RedirectUrl" => redirect_url,
        "RESTRedirectUrl" as "restRedirectUrl" => rest_redirect_url,
        "RedirectSection" => redirect_section,
        "ToExecuteOrder" => to_execute_order,
        "Metadata" => metadata,
        "ServiceLabels" => service_labels,
        "IsSecure" => is_secure,
        "IsSwarmModeEnable" => is_swarm_mode_enable,
        "IsDebuggingEnabled" => is_debugging_enabled,
    ];
}

impl AppEngineDb {
    /// Returns all installed apps, in no particular order.
    ///
    /// Fails with [`Error::DataIntegrity`] if any app has an empty
    /// identifier, which happens when this is not the platform box database.
    pub fn apps(&self) -> Result<Vec<App>> {
        let apps: Vec<App> = self.query_records(APPS_QUERY)?;
        if apps.iter().any(|app| app.id.is_empty()) {
            return Err(Error::DataIntegrity(
                "empty IE App identifier: did you open the correct database?".to_string(),
            ));
        }
        Ok(apps)
    }
}
