//! Job definition registry.
//!
//! Provisions bundles and activities in the automation service from the
//! local bundle packages. Every definition is addressed by its qualified id
//! `<nickname>.<name>+<alias>`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::bundles::BundleDirectory;
use crate::config::Settings;
use crate::error::{Result, ServerError};
use crate::forge::design_automation::{
    Activity, ActivityParameter, Alias, AppBundleSpec, StringSetting, Verb,
};
use crate::forge::AutomationService;

/// Engine family an engine id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Max,
    AutoCad,
    Inventor,
    Revit,
}

impl EngineKind {
    /// Match an engine id such as `Autodesk.Revit+2020`.
    ///
    /// Matching is by substring, first match wins.
    pub fn detect(engine: &str) -> Result<Self> {
        const ORDER: [(&str, EngineKind); 4] = [
            ("3dsMax", EngineKind::Max),
            ("AutoCAD", EngineKind::AutoCad),
            ("Inventor", EngineKind::Inventor),
            ("Revit", EngineKind::Revit),
        ];

        ORDER
            .iter()
            .find(|(marker, _)| engine.contains(marker))
            .map(|(_, kind)| *kind)
            .ok_or_else(|| ServerError::UnknownEngine(engine.to_string()))
    }

    fn command_line_template(&self) -> &'static str {
        match self {
            EngineKind::Max => {
                r"$(engine.path)\3dsmaxbatch.exe -sceneFile $(args[inputFile].path) $(settings[script].path)"
            }
            EngineKind::AutoCad => {
                r"$(engine.path)\accoreconsole.exe /i $(args[inputFile].path) /al $(appbundles[{0}].path) /s $(settings[script].path)"
            }
            EngineKind::Inventor => {
                r"$(engine.path)\InventorCoreConsole.exe /i $(args[inputFile].path) /al $(appbundles[{0}].path)"
            }
            EngineKind::Revit => {
                r"$(engine.path)\revitcoreconsole.exe /i $(args[inputFile].path) /al $(appbundles[{0}].path)"
            }
        }
    }

    /// Command line with the bundle name substituted
    pub fn command_line(&self, bundle_name: &str) -> String {
        self.command_line_template().replace("{0}", bundle_name)
    }

    /// Script handed to the engine through the `script` setting
    pub fn script(&self) -> &'static str {
        match self {
            EngineKind::Max => {
                "da = dotNetClass(\"Autodesk.Forge.Sample.DesignAutomation.Max.RuntimeExecute\")\nda.ModifyWindowWidthHeight()\n"
            }
            EngineKind::AutoCad => "UpdateParam\n",
            EngineKind::Inventor | EngineKind::Revit => "",
        }
    }
}

/// Result of provisioning a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleRef {
    #[serde(rename = "AppBundle")]
    pub app_bundle: String,
    #[serde(rename = "Version")]
    pub version: u32,
}

/// Result of provisioning an activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityRef {
    Created(String),
    AlreadyDefined,
}

impl ActivityRef {
    /// Value reported back to the browser
    pub fn label(&self) -> &str {
        match self {
            ActivityRef::Created(id) => id,
            ActivityRef::AlreadyDefined => "Activity already defined",
        }
    }
}

pub struct JobRegistry {
    automation: Arc<dyn AutomationService>,
    bundles: BundleDirectory,
    nickname: String,
    alias: String,
}

impl JobRegistry {
    pub fn new(settings: &Settings, automation: Arc<dyn AutomationService>, bundles: BundleDirectory) -> Self {
        Self {
            automation,
            bundles,
            nickname: settings.nickname.clone(),
            alias: settings.alias.clone(),
        }
    }

    pub fn bundles(&self) -> &BundleDirectory {
        &self.bundles
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}+{}", self.nickname, name, self.alias)
    }

    /// Create or update the bundle built from `<zip_name>.zip` and upload its
    /// package. The alias always ends up on the newest version.
    pub async fn ensure_bundle(&self, zip_name: &str, engine: &str) -> Result<BundleRef> {
        EngineKind::detect(engine)?;
        let package = self.bundles.read(zip_name).await?;

        let name = format!("{}AppBundle", zip_name);
        let qualified = self.qualified(&name);
        let existing = self.automation.app_bundles().await?;

        let created = if !existing.contains(&qualified) {
            let spec = AppBundleSpec {
                id: Some(name.clone()),
                package: Some(name.clone()),
                engine: engine.to_string(),
                description: format!("Description for {}", name),
            };
            let created = self.automation.create_app_bundle(&spec).await?;

            let alias = Alias {
                id: self.alias.clone(),
                version: 1,
            };
            self.automation.create_app_bundle_alias(&name, &alias).await?;
            created
        } else {
            let spec = AppBundleSpec {
                engine: engine.to_string(),
                description: name.clone(),
                ..Default::default()
            };
            let created = self.automation.create_app_bundle_version(&name, &spec).await?;
            self.automation
                .modify_app_bundle_alias(&name, &self.alias, created.version)
                .await?;
            created
        };

        self.automation
            .upload_app_bundle(&created.upload_parameters, &format!("{}.zip", zip_name), package)
            .await?;

        tracing::info!("Provisioned {} version {}", qualified, created.version);
        Ok(BundleRef {
            app_bundle: qualified,
            version: created.version,
        })
    }

    /// Define the activity for `<zip_name>` unless it already exists.
    ///
    /// Existing activities point at the bundle alias, so they never need to
    /// change when the bundle does.
    pub async fn ensure_activity(&self, zip_name: &str, engine: &str) -> Result<ActivityRef> {
        let kind = EngineKind::detect(engine)?;

        let bundle_name = format!("{}AppBundle", zip_name);
        let name = format!("{}Activity", zip_name);
        let qualified = self.qualified(&name);

        if self.automation.activities().await?.contains(&qualified) {
            tracing::debug!("{} already defined", qualified);
            return Ok(ActivityRef::AlreadyDefined);
        }

        let mut settings = BTreeMap::new();
        settings.insert(
            "script".to_string(),
            StringSetting {
                value: kind.script().to_string(),
            },
        );

        let spec = Activity {
            id: name.clone(),
            command_line: vec![kind.command_line(&bundle_name)],
            parameters: activity_parameters(),
            engine: engine.to_string(),
            app_bundles: vec![self.qualified(&bundle_name)],
            settings,
            description: String::new(),
        };
        self.automation.create_activity(&spec).await?;

        let alias = Alias {
            id: self.alias.clone(),
            version: 1,
        };
        self.automation.create_activity_alias(&name, &alias).await?;

        tracing::info!("Defined activity {}", qualified);
        Ok(ActivityRef::Created(qualified))
    }

    /// Activities owned by this nickname, without the nickname prefix
    pub async fn defined_activities(&self) -> Result<Vec<String>> {
        let prefix = format!("{}.", self.nickname);
        Ok(self
            .automation
            .activities()
            .await?
            .into_iter()
            .filter(|a| !a.contains("$LATEST"))
            .filter_map(|a| a.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Available engines of the Revit family, sorted
    pub async fn engines(&self) -> Result<Vec<String>> {
        let mut engines: Vec<String> = self
            .automation
            .engines()
            .await?
            .into_iter()
            .filter(|e| e.contains("Revit"))
            .collect();
        engines.sort();
        Ok(engines)
    }

    /// Delete every definition owned by the app
    pub async fn clear_account(&self) -> Result<()> {
        self.automation.delete_app().await?;
        tracing::warn!("Cleared automation account for {}", self.nickname);
        Ok(())
    }
}

fn activity_parameters() -> BTreeMap<String, ActivityParameter> {
    let parameter = |verb, local_name: &str, required, description: &str| ActivityParameter {
        verb,
        local_name: local_name.to_string(),
        required,
        ondemand: false,
        zip: false,
        description: description.to_string(),
    };

    let mut parameters = BTreeMap::new();
    parameters.insert(
        "inputFile".to_string(),
        parameter(Verb::Get, "$(inputFile)", true, "input file"),
    );
    parameters.insert(
        "inputJson".to_string(),
        parameter(Verb::Get, "params.json", false, "input json"),
    );
    parameters.insert(
        "outputFile".to_string(),
        parameter(Verb::Put, "$(inputFile)", false, "output model file"),
    );
    parameters
}
