use super::{CoordinatorError, DistributionError, ReportError};

impl From<&'static str> for CoordinatorError {
    fn from(message: &'static str) -> Self {
        CoordinatorError::TestExpectation { message }
    }
}

impl From<String> for CoordinatorError {
    fn from(value: String) -> Self {
        CoordinatorError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for ReportError {
    fn from(message: &'static str) -> Self {
        ReportError::TestExpectation { message }
    }
}

impl From<String> for ReportError {
    fn from(value: String) -> Self {
        ReportError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}

impl From<&'static str> for DistributionError {
    fn from(message: &'static str) -> Self {
        DistributionError::TestExpectation { message }
    }
}

impl From<String> for DistributionError {
    fn from(value: String) -> Self {
        DistributionError::TestExpectationValue {
            message: "Test expectation failed",
            value,
        }
    }
}
