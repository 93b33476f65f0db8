use shardpipe_core::ShardpipeError;
use shardpipe_protocol::packets::{
    ColumnDefinition41Packet, EofPacket, ErrPacket, OkPacket, TextResultSetRowPacket,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultPhase {
    AwaitFirst,
    Columns,
    Rows,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenericResponse {
    Ok(OkPacket),
    Err(ErrPacket),
}

/// Accumulator that folds a backend response packet sequence into one logical
/// result. Owned by a single connection's read path; not synchronized.
#[derive(Debug)]
pub struct QueryResult {
    generic_response: Option<GenericResponse>,
    column_count: usize,
    columns: Vec<ColumnDefinition41Packet>,
    rows: Vec<TextResultSetRowPacket>,
    columns_eof: Option<EofPacket>,
    rows_eof: Option<EofPacket>,
    phase: ResultPhase,
}

impl QueryResult {
    pub fn new() -> Self {
        Self {
            generic_response: None,
            column_count: 0,
            columns: Vec::new(),
            rows: Vec::new(),
            columns_eof: None,
            rows_eof: None,
            phase: ResultPhase::AwaitFirst,
        }
    }

    fn phase_error(&self, operation: &str) -> ShardpipeError {
        ShardpipeError::Protocol(format!(
            "{operation} not legal in result phase {:?}",
            self.phase
        ))
    }

    pub fn feed_generic(&mut self, response: GenericResponse) -> Result<(), ShardpipeError> {
        if self.phase != ResultPhase::AwaitFirst {
            return Err(self.phase_error("generic response"));
        }
        self.generic_response = Some(response);
        self.phase = ResultPhase::Done;
        Ok(())
    }

    pub fn feed_column_count(&mut self, count: u64) -> Result<(), ShardpipeError> {
        if self.phase != ResultPhase::AwaitFirst {
            return Err(self.phase_error("column count"));
        }
        if count == 0 {
            return Err(ShardpipeError::Protocol("result set with zero columns".into()));
        }
        self.column_count = count as usize;
        self.columns = Vec::with_capacity(self.column_count);
        self.phase = ResultPhase::Columns;
        Ok(())
    }

    pub fn feed_column_definition(
        &mut self,
        definition: ColumnDefinition41Packet,
    ) -> Result<(), ShardpipeError> {
        if !self.need_column_definition() {
            return Err(self.phase_error("column definition"));
        }
        self.columns.push(definition);
        Ok(())
    }

    pub fn feed_columns_eof(&mut self, eof: EofPacket) -> Result<(), ShardpipeError> {
        if self.phase != ResultPhase::Columns || !self.column_finished() {
            return Err(self.phase_error("column EOF"));
        }
        self.columns_eof = Some(eof);
        self.phase = ResultPhase::Rows;
        Ok(())
    }

    pub fn feed_row(&mut self, row: TextResultSetRowPacket) -> Result<(), ShardpipeError> {
        if self.phase != ResultPhase::Rows {
            return Err(self.phase_error("row"));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn feed_rows_eof(&mut self, eof: EofPacket) -> Result<(), ShardpipeError> {
        if self.phase != ResultPhase::Rows {
            return Err(self.phase_error("row EOF"));
        }
        self.rows_eof = Some(eof);
        self.phase = ResultPhase::Done;
        Ok(())
    }

    /// True while column definitions are still outstanding.
    pub fn need_column_definition(&self) -> bool {
        self.phase == ResultPhase::Columns && self.columns.len() < self.column_count
    }

    pub fn column_finished(&self) -> bool {
        self.columns.len() == self.column_count
    }

    pub fn phase(&self) -> ResultPhase {
        self.phase
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn generic_response(&self) -> Option<&GenericResponse> {
        self.generic_response.as_ref()
    }

    pub fn columns(&self) -> &[ColumnDefinition41Packet] {
        &self.columns
    }

    pub fn rows(&self) -> &[TextResultSetRowPacket] {
        &self.rows
    }

    pub fn columns_eof(&self) -> Option<&EofPacket> {
        self.columns_eof.as_ref()
    }

    pub fn rows_eof(&self) -> Option<&EofPacket> {
        self.rows_eof.as_ref()
    }

    /// The SQL error carried by an ERR response, if that is what arrived.
    pub fn sql_error(&self) -> Option<ShardpipeError> {
        match &self.generic_response {
            Some(GenericResponse::Err(packet)) => Some(packet.into()),
            _ => None,
        }
    }
}

impl Default for QueryResult {
    fn default() -> Self {
        Self::new()
    }
}
