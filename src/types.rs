/// Unique record identifier (stable for the lifetime of an index).
/// Examples: `sub-01/func/sub-01_task-rest_bold.nii.gz`, `17`
pub type RecordId = String;
/// Name of a tag attached to a record.
/// Examples: `sub`, `ses`, `task`, `run`, `datatype`
pub type TagName = String;
/// Canonical string value of a tag.
/// Examples: `01`, `rest`, `bold`
pub type TagValue = String;
/// Value of the across-key removed from a record before grouping.
/// Examples: `01` (when pooling across `sub`), `2` (when pooling across `run`)
pub type AcrossValue = String;
/// Attribute name inside one of the four result fields.
/// Examples: `fd_mean`, `sources`, `effect`
pub type FieldKey = String;
/// Variable name in a caller-supplied covariate table.
/// Examples: `age`, `group`
pub type VariableName = String;
