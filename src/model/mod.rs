//! Risk model documents and their loaders

mod loader;
mod types;

pub use loader::{load_fx_table, load_model, load_portfolio};
pub use types::{
    Affects,
    Asset,
    AssetModel,
    Basis,
    Control,
    ControlDependency,
    ControlLayer,
    ControlSet,
    ControlType,
    CopulaFamily,
    CopulaSpec,
    CopulaStructure,
    DependencySpec,
    Evidence,
    FrequencyKind,
    FrequencySpec,
    MixtureComponentSpec,
    ParamValue,
    RawParameters,
    RiskModel,
    SeverityKind,
    SeveritySpec,
};
